use async_trait::async_trait;
use thiserror::Error;

/// Outcome classes for a failed dispatch. The notification queue drops the
/// batch on `Permanent` and keeps it for the next window on `Transient`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("permanent mail failure: {0}")]
    Permanent(String),

    #[error("transient mail failure: {0}")]
    Transient(String),
}

/// Sends one message to the configured recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError>;
}
