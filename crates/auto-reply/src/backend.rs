//! Reply backend seam and the bounded retry loop around it.

use std::time::Duration;

use {
    async_trait::async_trait,
    parley_common::types::{MessageContext, Reply},
    parley_config::ReplyConfig,
    parley_sessions::Session,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, reply as reply_metrics};

use crate::error::{Error, Result};

/// What the backend produced for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub replies: Vec<Reply>,
    /// Conversation id assigned by the backend, if any.
    pub conversation_id: Option<String>,
}

impl ReplyOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            replies: vec![Reply::Text(text.into())],
            conversation_id: None,
        }
    }
}

/// Generates replies for merged queries (an LLM, a workflow API, ...).
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    async fn generate(
        &self,
        session: &Session,
        query: &str,
        ctx: &MessageContext,
    ) -> Result<ReplyOutcome>;
}

/// Backend that answers every query with `Echo: <query>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoBackend;

#[async_trait]
impl ReplyBackend for EchoBackend {
    async fn generate(
        &self,
        session: &Session,
        query: &str,
        _ctx: &MessageContext,
    ) -> Result<ReplyOutcome> {
        let conversation_id = session
            .conversation_id
            .is_empty()
            .then(|| format!("echo-{}", session.session_id));
        Ok(ReplyOutcome {
            replies: vec![Reply::Text(format!("Echo: {query}"))],
            conversation_id,
        })
    }
}

/// Bounded retry around [`ReplyBackend::generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; 0 behaves like 1.
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReplyConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &ReplyConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            backoff: config.retry_backoff(),
            timeout: config.request_timeout(),
        }
    }
}

/// Call the backend until it succeeds, a non-retryable error occurs, or the
/// policy's attempts are used up. Returns the last error on failure.
pub async fn generate_with_retry(
    backend: &dyn ReplyBackend,
    policy: &RetryPolicy,
    session: &Session,
    query: &str,
    ctx: &MessageContext,
) -> Result<ReplyOutcome> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        #[cfg(feature = "metrics")]
        counter!(reply_metrics::ATTEMPTS_TOTAL).increment(1);

        let result = match tokio::time::timeout(policy.timeout, backend.generate(session, query, ctx))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                after: policy.timeout,
            }),
        };

        match result {
            Ok(outcome) => {
                if attempt > 1 {
                    debug!(session_id = %session.session_id, attempt, "reply backend recovered");
                }
                return Ok(outcome);
            },
            Err(e) if attempt < attempts && e.is_retryable() => {
                warn!(
                    session_id = %session.session_id,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "reply backend failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(reply_metrics::FAILURES_TOTAL).increment(1);
                return Err(e);
            },
        }
    }
}
