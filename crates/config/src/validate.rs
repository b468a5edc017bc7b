//! Configuration validation.
//!
//! Reports unknown sections/fields (usually typos) and semantic problems such
//! as unknown timezones or inverted intervals. Validation never fails hard;
//! callers decide what to do with error diagnostics.

use std::path::Path;

use {
    chrono::{NaiveTime, Timelike},
    serde_json::Value,
};

use crate::{loader::load_config_value, schema::ParleyConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "timezone", "band", "interval"
    pub category: &'static str,
    /// Dotted path, e.g. "greeting.bands[1].start"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity, self.category, self.path, self.message
        )
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Known field names per section.
const KNOWN_FIELDS: &[(&str, &[&str])] = &[
    ("debounce", &[
        "quiet_period_secs",
        "max_query_chars",
        "max_pending_sessions",
    ]),
    ("reaper", &["max_age_secs", "sweep_interval_secs"]),
    ("greeting", &[
        "enabled",
        "min_interval_secs",
        "max_interval_secs",
        "timezone",
        "bands",
        "settle_delay_secs",
        "prompt",
        "whitelist_path",
        "whitelist_poll_secs",
    ]),
    ("reply", &[
        "error_reply",
        "image_create_prefix",
        "clear_command",
        "group_mention",
        "split_sentences",
        "retry_attempts",
        "retry_backoff_ms",
        "request_timeout_secs",
    ]),
    ("sessions", &[
        "max_conversation_messages",
        "system_prompt",
        "max_history_tokens",
    ]),
    ("channels", &["identify_by"]),
];

/// Parse and validate a config file on disk.
pub fn validate_file(path: &Path) -> ValidationResult {
    let mut result = ValidationResult {
        config_path: Some(path.to_path_buf()),
        ..Default::default()
    };

    let value = match load_config_value(path) {
        Ok(v) => v,
        Err(e) => {
            result.push(Severity::Error, "syntax", "", e.to_string());
            return result;
        },
    };
    check_unknown_fields(&value, &mut result);

    match serde_json::from_value::<ParleyConfig>(value) {
        Ok(cfg) => result.diagnostics.extend(validate(&cfg).diagnostics),
        Err(e) => result.push(Severity::Error, "syntax", "", e.to_string()),
    }
    result
}

fn check_unknown_fields(value: &Value, result: &mut ValidationResult) {
    let Some(root) = value.as_object() else {
        return;
    };
    for (section, body) in root {
        let Some((_, fields)) = KNOWN_FIELDS.iter().find(|(name, _)| name == section) else {
            result.push(
                Severity::Warning,
                "unknown-field",
                section.as_str(),
                "unknown section",
            );
            continue;
        };
        let Some(body) = body.as_object() else {
            continue;
        };
        for key in body.keys() {
            if !fields.contains(&key.as_str()) {
                result.push(
                    Severity::Warning,
                    "unknown-field",
                    format!("{section}.{key}"),
                    "unknown field",
                );
            }
        }
    }
}

/// Check semantic constraints on an already-parsed configuration.
#[must_use]
pub fn validate(cfg: &ParleyConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if cfg.debounce.quiet_period_secs == 0 {
        result.push(
            Severity::Warning,
            "interval",
            "debounce.quiet_period_secs",
            "0 disables merging; every fragment is flushed on its own",
        );
    }
    if cfg.debounce.max_query_chars == 0 {
        result.push(
            Severity::Error,
            "interval",
            "debounce.max_query_chars",
            "must be greater than 0",
        );
    }
    if cfg.reaper.sweep_interval_secs == 0 {
        result.push(
            Severity::Error,
            "interval",
            "reaper.sweep_interval_secs",
            "must be greater than 0",
        );
    }
    if cfg.reaper.max_age_secs <= cfg.debounce.quiet_period_secs {
        result.push(
            Severity::Warning,
            "interval",
            "reaper.max_age_secs",
            "not longer than the quiet period; buffers may be reaped before they flush",
        );
    }

    let greeting = &cfg.greeting;
    if greeting.min_interval_secs > greeting.max_interval_secs {
        result.push(
            Severity::Error,
            "interval",
            "greeting.min_interval_secs",
            format!(
                "min interval {}s exceeds max interval {}s",
                greeting.min_interval_secs, greeting.max_interval_secs
            ),
        );
    }
    if greeting.timezone.parse::<chrono_tz::Tz>().is_err() {
        result.push(
            Severity::Error,
            "timezone",
            "greeting.timezone",
            format!("unknown timezone: {}", greeting.timezone),
        );
    }
    if greeting.enabled && greeting.bands.is_empty() {
        result.push(
            Severity::Warning,
            "band",
            "greeting.bands",
            "no bands configured; greetings will never be sent",
        );
    }
    for (i, band) in greeting.bands.iter().enumerate() {
        let start = parse_band_minutes(&band.start);
        let end = parse_band_minutes(&band.end);
        if start.is_none() {
            result.push(
                Severity::Error,
                "band",
                format!("greeting.bands[{i}].start"),
                format!("expected HH:MM, got {:?}", band.start),
            );
        }
        if end.is_none() {
            result.push(
                Severity::Error,
                "band",
                format!("greeting.bands[{i}].end"),
                format!("expected HH:MM, got {:?}", band.end),
            );
        }
        if let (Some(s), Some(e)) = (start, end)
            && s >= e
        {
            result.push(
                Severity::Error,
                "band",
                format!("greeting.bands[{i}]"),
                "band must end after it starts",
            );
        }
    }

    if cfg.reply.retry_attempts == 0 {
        result.push(
            Severity::Warning,
            "interval",
            "reply.retry_attempts",
            "0 is treated as a single attempt",
        );
    }

    result
}

/// Minutes since midnight for an `HH:MM` string; `24:00` is end of day.
#[must_use]
pub fn parse_band_minutes(s: &str) -> Option<u32> {
    if s == "24:00" {
        return Some(24 * 60);
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .ok()
        .map(|t| t.hour() * 60 + t.minute())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::GreetingBand;

    #[test]
    fn defaults_are_clean() {
        let result = validate(&ParleyConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn inverted_interval_is_error() {
        let mut cfg = ParleyConfig::default();
        cfg.greeting.min_interval_secs = 100;
        cfg.greeting.max_interval_secs = 10;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "greeting.min_interval_secs")
        );
    }

    #[test]
    fn bad_timezone_and_band() {
        let mut cfg = ParleyConfig::default();
        cfg.greeting.timezone = "Mars/Olympus".into();
        cfg.greeting.bands = vec![
            GreetingBand::new("8am", "12:00"),
            GreetingBand::new("22:00", "19:00"),
        ];
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 3);
        assert!(result.diagnostics.iter().any(|d| d.category == "timezone"));
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "greeting.bands[0].start")
        );
        assert!(result.diagnostics.iter().any(|d| d.path == "greeting.bands[1]"));
    }

    #[test]
    fn band_minutes() {
        assert_eq!(parse_band_minutes("08:00"), Some(480));
        assert_eq!(parse_band_minutes("24:00"), Some(1440));
        assert_eq!(parse_band_minutes("25:00"), None);
    }

    #[test]
    fn file_with_typo_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(
            &path,
            "[debounce]\nquiet_perod_secs = 3\n\n[greting]\nenabled = false\n",
        )
        .unwrap();

        let result = validate_file(&path);
        assert!(!result.has_errors());
        let paths: Vec<&str> = result.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"debounce.quiet_perod_secs"));
        assert!(paths.contains(&"greting"));
    }

    #[test]
    fn syntax_error_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[debounce\n").unwrap();
        let result = validate_file(&path);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }
}
