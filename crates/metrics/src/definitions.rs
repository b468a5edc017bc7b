//! Metric name and label definitions.
//!
//! All metric names recorded by parley crates live here so the set of
//! exported series is documented in one place.

/// Query debouncer metrics
pub mod debounce {
    /// Total fragments submitted to the debouncer
    pub const FRAGMENTS_TOTAL: &str = "parley_debounce_fragments_total";
    /// Total merged queries handed to the flush callback
    pub const FLUSHES_TOTAL: &str = "parley_debounce_flushes_total";
    /// Flushes caused by the merged text reaching the size limit
    pub const SIZE_SPLITS_TOTAL: &str = "parley_debounce_size_splits_total";
    /// Fragments flushed immediately because the buffer table was full
    pub const CAPACITY_BYPASS_TOTAL: &str = "parley_debounce_capacity_bypass_total";
    /// Number of sessions currently holding an open buffer
    pub const PENDING_SESSIONS: &str = "parley_debounce_pending_sessions";
    /// Buffers discarded by the stale-buffer reaper
    pub const REAPED_TOTAL: &str = "parley_debounce_reaped_total";
}

/// Greeting scheduler metrics
pub mod greeting {
    /// Number of armed greeting timers
    pub const ARMED: &str = "parley_greeting_armed";
    /// Greetings actually sent
    pub const SENT_TOTAL: &str = "parley_greeting_sent_total";
    /// Timer firings skipped because the time was outside every band
    pub const OUT_OF_WINDOW_TOTAL: &str = "parley_greeting_out_of_window_total";
    /// Whitelist reloads (labels: outcome)
    pub const WHITELIST_RELOADS_TOTAL: &str = "parley_greeting_whitelist_reloads_total";
}

/// Reply backend metrics
pub mod reply {
    /// Total backend generate calls, including retries
    pub const ATTEMPTS_TOTAL: &str = "parley_reply_attempts_total";
    /// Backend calls that exhausted every retry
    pub const FAILURES_TOTAL: &str = "parley_reply_failures_total";
    /// Duration of a full reply cycle (generate + send) in seconds
    pub const CYCLE_DURATION_SECONDS: &str = "parley_reply_cycle_duration_seconds";
}

/// Session registry metrics
pub mod sessions {
    /// Total sessions created
    pub const CREATED_TOTAL: &str = "parley_sessions_created_total";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const OUTCOME: &str = "outcome";
}
