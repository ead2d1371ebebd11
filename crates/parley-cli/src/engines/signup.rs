use async_trait::async_trait;
use parley_contract::{Action, Decision, DecisionEngine, DecisionError, DecisionRequest};

use crate::signup_list::SignupList;

/// Adds the watched account to numbered sign-up lists posted in the chat.
#[derive(Debug, Clone)]
pub struct SignupDecisionEngine {
    self_name: String,
}

impl SignupDecisionEngine {
    pub fn new(self_name: impl Into<String>) -> Self {
        Self {
            self_name: self_name.into(),
        }
    }
}

#[async_trait]
impl DecisionEngine for SignupDecisionEngine {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, DecisionError> {
        let Some(latest) = request.incoming().last() else {
            return Ok(Decision::default());
        };
        let skip = || -> Result<Decision, DecisionError> {
            Ok(Decision::actions(vec![Action::skip(latest.id.clone())]))
        };

        let Some(mut list) = latest.body_text().and_then(SignupList::parse) else {
            tracing::debug!(chat = %request.chat, message_id = %latest.id, "not a sign-up list");
            return skip();
        };
        if list.contains(&self.self_name) {
            tracing::debug!(chat = %request.chat, message_id = %latest.id, "already signed up");
            return skip();
        }
        let Some(position) = list.fill_first_empty(&self.self_name) else {
            tracing::info!(chat = %request.chat, message_id = %latest.id, "sign-up list is full");
            return skip();
        };

        tracing::info!(
            chat = %request.chat,
            message_id = %latest.id,
            position,
            "signing up"
        );
        Ok(Decision::actions(vec![Action::reply(
            latest.id.clone(),
            list.render(),
        )]))
    }
}
