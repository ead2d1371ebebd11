use async_trait::async_trait;
use parley_contract::{Action, Decision, DecisionEngine, DecisionError, DecisionRequest};

/// Reacts to the newest incoming message with a fixed emoji.
#[derive(Debug, Clone)]
pub struct ReactDecisionEngine {
    emoji: String,
}

impl ReactDecisionEngine {
    pub fn new(emoji: impl Into<String>) -> Self {
        Self {
            emoji: emoji.into(),
        }
    }

    pub fn emoji(&self) -> &str {
        &self.emoji
    }
}

#[async_trait]
impl DecisionEngine for ReactDecisionEngine {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let actions = request
            .incoming()
            .last()
            .map(|latest| vec![Action::react(latest.id.clone(), self.emoji.as_str())])
            .unwrap_or_default();
        Ok(Decision::actions(actions))
    }
}
