pub mod gemini;

pub use gemini::GeminiOracle;

use crate::domain::ports::ReasoningOracle;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

/// Scripted oracle for tests: returns queued answers in order, then errors.
pub struct StubOracle {
    answers: Mutex<Vec<Result<Value>>>,
}

impl StubOracle {
    pub fn new(answers: Vec<Result<Value>>) -> Self {
        Self {
            answers: Mutex::new(answers),
        }
    }
}

#[async_trait]
impl ReasoningOracle for StubOracle {
    fn is_configured(&self) -> bool {
        true
    }

    async fn reason(&self, _contract: &str, _context: Value) -> Result<Value> {
        let mut answers = self.answers.lock().await;
        if answers.is_empty() {
            anyhow::bail!("no scripted answer left");
        }
        answers.remove(0)
    }
}

/// Placeholder used when no oracle credentials are present.
pub struct DisabledOracle;

#[async_trait]
impl ReasoningOracle for DisabledOracle {
    fn is_configured(&self) -> bool {
        false
    }

    async fn reason(&self, _contract: &str, _context: Value) -> Result<Value> {
        anyhow::bail!("reasoning oracle is not configured")
    }
}
