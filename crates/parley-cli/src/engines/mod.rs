//! Built-in decision engines for running without an external model.

mod react;
mod signup;

use std::sync::Arc;

use parley_contract::DecisionEngine;
use serde::{Deserialize, Serialize};

pub use react::ReactDecisionEngine;
pub use signup::SignupDecisionEngine;

/// Enumerates supported `EngineKind` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    React,
    Signup,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Signup => "signup",
        }
    }
}

pub fn build_engine(kind: EngineKind, emoji: &str, self_name: &str) -> Arc<dyn DecisionEngine> {
    match kind {
        EngineKind::React => Arc::new(ReactDecisionEngine::new(emoji)),
        EngineKind::Signup => Arc::new(SignupDecisionEngine::new(self_name)),
    }
}
