//! In-memory session registry.
//!
//! Sessions are created on first use and live for the lifetime of the
//! process. Callers get owned snapshots; mutations go through [`SessionRegistry::update`]
//! so no lock is ever held across an await point outside this module.

use std::collections::HashMap;

use {tokio::sync::RwLock, tracing::debug};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, sessions as session_metrics};

use crate::session::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    system_prompt: Option<String>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionRegistry {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            system_prompt,
        }
    }

    /// Return the session, creating it on first sight.
    ///
    /// The user identifier of an existing session is refreshed when the
    /// channel reports a different one (e.g. a renamed contact).
    pub async fn get_or_create(&self, session_id: &str, user_identifier: &str) -> Session {
        {
            let sessions = self.sessions.read().await;
            if let Some(s) = sessions.get(session_id)
                && s.user_identifier == user_identifier
            {
                return s.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, user_identifier, "creating session");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::CREATED_TOTAL).increment(1);
            Session::new(session_id, user_identifier, self.system_prompt.clone())
        });
        if session.user_identifier != user_identifier {
            session.user_identifier = user_identifier.to_string();
        }
        session.clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Apply `f` to a session in place. Returns `None` if it does not exist.
    pub async fn update<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(session_id).map(f)
    }

    /// Reset a session's history and conversation. Returns `false` if unknown.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.update(session_id, Session::reset).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn creates_once() {
        let reg = SessionRegistry::default();
        let a = reg.get_or_create("s1", "alice").await;
        let b = reg.get_or_create("s1", "alice").await;
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn update_is_visible() {
        let reg = SessionRegistry::default();
        reg.get_or_create("s1", "alice").await;
        reg.update("s1", |s| s.conversation_id = "conv-9".into())
            .await;
        assert_eq!(
            reg.get("s1").await.map(|s| s.conversation_id),
            Some("conv-9".to_string())
        );
        assert!(reg.update("missing", |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn identifier_refreshes() {
        let reg = SessionRegistry::default();
        reg.get_or_create("s1", "alice").await;
        let s = reg.get_or_create("s1", "alice-renamed").await;
        assert_eq!(s.user_identifier, "alice-renamed");
    }

    #[tokio::test]
    async fn clear_resets_conversation() {
        let reg = SessionRegistry::new(Some("prompt".into()));
        reg.get_or_create("s1", "alice").await;
        reg.update("s1", |s| {
            s.conversation_id = "c".into();
            s.add_query("hello");
        })
        .await;
        assert!(reg.clear("s1").await);
        let s = reg.get("s1").await;
        assert!(s.as_ref().is_some_and(|s| s.conversation_id.is_empty()));
        assert_eq!(s.map(|s| s.messages().len()), Some(1));
        assert!(!reg.clear("nope").await);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_single_entry() {
        let reg = Arc::new(SessionRegistry::default());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.get_or_create("shared", "bob").await;
            }));
        }
        for h in handles {
            let _ = h.await;
        }
        assert_eq!(reg.len().await, 1);
    }
}
