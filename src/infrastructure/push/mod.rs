pub mod line;
pub mod telegram;

pub use line::LineChannel;
pub use telegram::TelegramChannel;

use crate::domain::ports::PushChannel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Test double that records sent texts and returns a scripted outcome.
pub struct RecordingChannel {
    name: &'static str,
    succeed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new(name: &'static str, succeed: bool) -> Self {
        Self {
            name,
            succeed: AtomicBool::new(succeed),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, text: &str) -> bool {
        self.sent.lock().await.push(text.to_string());
        self.succeed.load(Ordering::SeqCst)
    }
}
