use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The reply backend reported a failure.
    #[error("reply backend failed: {message}")]
    Backend { message: String },

    #[error("reply backend timed out after {after:?}")]
    Timeout { after: Duration },

    #[error(transparent)]
    Greeting(#[from] parley_greeting::Error),
}

impl Error {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
