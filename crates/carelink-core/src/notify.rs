use crate::error::CoreError;
use std::sync::Mutex;

/// Delivery contract for verification messages. Actual transport (SMTP,
/// SMS gateway) lives outside this service; implementations receive the
/// composed message and destination only.
pub trait NotificationSink: Send + Sync {
    fn send(&self, destination: &str, subject: &str, body: &str) -> Result<(), CoreError>;
}

/// Development sink: records that a dispatch happened. The body is not
/// logged, since OTP codes travel through it.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, destination: &str, subject: &str, _body: &str) -> Result<(), CoreError> {
        tracing::info!(%destination, %subject, "notification dispatched");
        Ok(())
    }
}

/// Test support: captures every message for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<SentMessage>>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, destination: &str, subject: &str, body: &str) -> Result<(), CoreError> {
        let mut guard = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(SentMessage {
            destination: destination.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
