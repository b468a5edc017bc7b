//! Greeting whitelist: an injectable source plus a pull-based TTL cache.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{sync::Mutex, time::Instant},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, greeting as greeting_metrics, labels};

use crate::error::{Context, Result};

/// Where the set of greetable user identifiers comes from.
#[async_trait]
pub trait WhitelistSource: Send + Sync {
    async fn load(&self) -> Result<HashSet<String>>;
}

/// Reads a JSON array of user identifiers. A missing file is an empty list.
pub struct FileWhitelistSource {
    path: PathBuf,
}

impl FileWhitelistSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WhitelistSource for FileWhitelistSource {
    async fn load(&self) -> Result<HashSet<String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "whitelist file missing, treating as empty");
                return Ok(HashSet::new());
            },
            Err(e) => return Err(e.into()),
        };
        let users: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing whitelist {}", self.path.display()))?;
        Ok(users
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect())
    }
}

/// Fixed in-memory whitelist.
#[derive(Debug, Clone, Default)]
pub struct StaticWhitelist {
    users: HashSet<String>,
}

impl StaticWhitelist {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl WhitelistSource for StaticWhitelist {
    async fn load(&self) -> Result<HashSet<String>> {
        Ok(self.users.clone())
    }
}

struct CacheState {
    users: Arc<HashSet<String>>,
    loaded_at: Option<Instant>,
}

/// Caches the whitelist and reloads it at most once per `ttl`.
///
/// A failed reload keeps the last known set and still counts as a load, so a
/// broken source is retried once per `ttl` rather than on every check.
pub struct WhitelistCache {
    source: Arc<dyn WhitelistSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl WhitelistCache {
    pub fn new(source: Arc<dyn WhitelistSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Mutex::new(CacheState {
                users: Arc::new(HashSet::new()),
                loaded_at: None,
            }),
        }
    }

    pub async fn contains(&self, user_identifier: &str) -> bool {
        self.snapshot().await.contains(user_identifier)
    }

    /// Current set, reloading first if the cache is stale.
    pub async fn snapshot(&self) -> Arc<HashSet<String>> {
        let mut state = self.state.lock().await;
        let fresh = state
            .loaded_at
            .is_some_and(|at| at.elapsed() < self.ttl);
        if !fresh {
            match self.source.load().await {
                Ok(users) => {
                    debug!(count = users.len(), "greeting whitelist reloaded");
                    state.users = Arc::new(users);
                    #[cfg(feature = "metrics")]
                    counter!(greeting_metrics::WHITELIST_RELOADS_TOTAL, labels::OUTCOME => "ok")
                        .increment(1);
                },
                Err(e) => {
                    warn!(error = %e, "greeting whitelist reload failed, keeping last known set");
                    #[cfg(feature = "metrics")]
                    counter!(greeting_metrics::WHITELIST_RELOADS_TOTAL, labels::OUTCOME => "error")
                        .increment(1);
                },
            }
            state.loaded_at = Some(Instant::now());
        }
        Arc::clone(&state.users)
    }
}
