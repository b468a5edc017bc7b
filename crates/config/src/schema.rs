//! Typed configuration schema.
//!
//! Every section is `#[serde(default)]`, so a partial (or empty) file yields a
//! complete configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub debounce: DebounceConfig,
    pub reaper: ReaperConfig,
    pub greeting: GreetingConfig,
    pub reply: ReplyConfig,
    pub sessions: SessionsConfig,
    pub channels: ChannelsConfig,
}

/// Query debouncer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Seconds without a new fragment after which a buffer is flushed. Defaults to 15.
    pub quiet_period_secs: u64,
    /// Maximum merged query length in characters. Defaults to 1000.
    pub max_query_chars: usize,
    /// Maximum number of sessions buffering at once. Defaults to 100.
    pub max_pending_sessions: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet_period_secs: 15,
            max_query_chars: 1000,
            max_pending_sessions: 100,
        }
    }
}

impl DebounceConfig {
    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }
}

/// Stale buffer reaper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Idle seconds after which an open buffer is discarded. Defaults to 300.
    pub max_age_secs: u64,
    /// Seconds between sweeps. Defaults to 60.
    pub sweep_interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl ReaperConfig {
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// One daily time band in which greetings may be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingBand {
    /// Inclusive start, `HH:MM`.
    pub start: String,
    /// Exclusive end, `HH:MM` (`24:00` for end of day).
    pub end: String,
}

impl GreetingBand {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Proactive greeting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    /// Whether greetings are scheduled at all. Defaults to true.
    pub enabled: bool,
    /// Lower bound of the random greeting interval. Defaults to 12h.
    pub min_interval_secs: u64,
    /// Upper bound of the random greeting interval. Defaults to 14h.
    pub max_interval_secs: u64,
    /// IANA timezone the bands are expressed in. Defaults to "Asia/Shanghai".
    pub timezone: String,
    /// Allowed daily bands. Defaults to 08:00–12:00 and 19:00–22:00.
    pub bands: Vec<GreetingBand>,
    /// Delay between a completed reply and re-arming. Defaults to 15s.
    pub settle_delay_secs: u64,
    /// Synthetic query sent to the backend when a greeting fires.
    pub prompt: String,
    /// JSON file holding the list of user identifiers to greet.
    pub whitelist_path: String,
    /// Minimum seconds between whitelist reloads. Defaults to 60.
    pub whitelist_poll_secs: u64,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: 12 * 3600,
            max_interval_secs: 14 * 3600,
            timezone: "Asia/Shanghai".into(),
            bands: vec![
                GreetingBand::new("08:00", "12:00"),
                GreetingBand::new("19:00", "22:00"),
            ],
            settle_delay_secs: 15,
            prompt: "[system greeting] say hello casually".into(),
            whitelist_path: "auto_greet_users.json".into(),
            whitelist_poll_secs: 60,
        }
    }
}

impl GreetingConfig {
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    #[must_use]
    pub fn whitelist_poll(&self) -> Duration {
        Duration::from_secs(self.whitelist_poll_secs)
    }
}

/// Reply path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Text sent to the user when the backend fails.
    pub error_reply: String,
    /// Prefix prepended to image-creation requests.
    pub image_create_prefix: String,
    /// Message text that resets the session instead of being answered.
    pub clear_command: String,
    /// Prefix group replies with `@nickname`. Defaults to true.
    pub group_mention: bool,
    /// Split long text replies into up to four messages. Defaults to true.
    pub split_sentences: bool,
    /// Backend attempts per query, including the first. Defaults to 3.
    pub retry_attempts: u32,
    /// Pause between backend attempts in milliseconds. Defaults to 3000.
    pub retry_backoff_ms: u64,
    /// Per-attempt backend timeout in seconds. Defaults to 180.
    pub request_timeout_secs: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            error_reply: "I ran into a problem, please try again later~".into(),
            image_create_prefix: "draw ".into(),
            clear_command: "#clear memory".into(),
            group_mention: true,
            split_sentences: true,
            retry_attempts: 3,
            retry_backoff_ms: 3000,
            request_timeout_secs: 180,
        }
    }
}

impl ReplyConfig {
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Conversation state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// User messages per backend conversation before it is rotated. Defaults to 5.
    pub max_conversation_messages: u32,
    /// Optional system prompt seeded into each session history.
    pub system_prompt: Option<String>,
    /// History budget (characters) kept per session. Defaults to 4000.
    pub max_history_tokens: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_conversation_messages: 5,
            system_prompt: None,
            max_history_tokens: 4000,
        }
    }
}

/// How a channel user is identified for whitelist lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyBy {
    /// Saved remark name, falling back to the nickname.
    #[default]
    Nickname,
    /// Stable platform user id.
    UserId,
}

/// Channel-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub identify_by: IdentifyBy,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: ParleyConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.debounce.quiet_period_secs, 15);
        assert_eq!(cfg.debounce.max_query_chars, 1000);
        assert_eq!(cfg.reaper.max_age_secs, 300);
        assert_eq!(cfg.greeting.bands.len(), 2);
        assert_eq!(cfg.greeting.timezone, "Asia/Shanghai");
        assert_eq!(cfg.channels.identify_by, IdentifyBy::Nickname);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
[debounce]
quiet_period_secs = 5

[channels]
identify_by = "user_id"
"#,
        )
        .unwrap();
        assert_eq!(cfg.debounce.quiet_period(), Duration::from_secs(5));
        assert_eq!(cfg.debounce.max_pending_sessions, 100);
        assert_eq!(cfg.channels.identify_by, IdentifyBy::UserId);
    }

    #[test]
    fn bands_override_replaces_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
[greeting]
bands = [{ start = "09:30", end = "10:00" }]
"#,
        )
        .unwrap();
        assert_eq!(cfg.greeting.bands, vec![GreetingBand::new("09:30", "10:00")]);
        assert_eq!(cfg.greeting.min_interval(), Duration::from_secs(12 * 3600));
    }
}
