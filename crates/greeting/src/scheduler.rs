//! Per-session greeting timers.
//!
//! Each armed session owns one tokio task that sleeps until its fire time.
//! Entries carry a generation number; a timer that wakes up after its entry
//! was disarmed or replaced sees a different generation and does nothing.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    parley_common::{SharedClock, types::MessageContext},
    parley_config::GreetingConfig,
    rand::Rng,
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, gauge, greeting as greeting_metrics};

use crate::{
    error::Result,
    whitelist::{WhitelistCache, WhitelistSource},
    window::GreetingWindow,
};

/// A greeting about to be delivered.
#[derive(Debug, Clone)]
pub struct GreetingRequest {
    pub session_id: String,
    pub context: MessageContext,
    /// Synthetic query routed through the normal reply path.
    pub prompt: String,
}

/// Callback that runs the reply path for a greeting and sends the result.
pub type GreetingFn = Arc<
    dyn Fn(GreetingRequest) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Reports whether a session has buffered input that has not been answered.
pub type BusyFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// What a timer did when it woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Sent,
    Failed,
    /// Current time outside every band; re-armed without sending.
    OutOfWindow,
    /// User no longer whitelisted; not re-armed.
    NotWhitelisted,
    /// Entry was disarmed or replaced while the timer slept.
    Stale,
    /// Session had unanswered input; dropped without re-arming.
    Busy,
}

/// Read-only view of an armed greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedGreeting {
    pub scheduled_at: DateTime<Utc>,
    /// `None` while the settle delay is still running.
    pub fire_at: Option<DateTime<Utc>>,
}

struct Entry {
    generation: u64,
    context: MessageContext,
    scheduled_at: DateTime<Utc>,
    fire_at: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
}

pub struct GreetingScheduler {
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    whitelist: Arc<WhitelistCache>,
    window: GreetingWindow,
    clock: SharedClock,
    min_interval: Duration,
    max_interval: Duration,
    prompt: String,
    enabled: bool,
    on_greet: GreetingFn,
    busy: Option<BusyFn>,
}

impl GreetingScheduler {
    pub fn new(
        config: &GreetingConfig,
        source: Arc<dyn WhitelistSource>,
        clock: SharedClock,
        on_greet: GreetingFn,
    ) -> Result<Self> {
        let window = GreetingWindow::from_config(config)?;
        Ok(Self::with_window(config, window, source, clock, on_greet))
    }

    /// Like [`GreetingScheduler::new`] with an already validated window.
    pub fn with_window(
        config: &GreetingConfig,
        window: GreetingWindow,
        source: Arc<dyn WhitelistSource>,
        clock: SharedClock,
        on_greet: GreetingFn,
    ) -> Self {
        let (min_interval, max_interval) = if config.min_interval() <= config.max_interval() {
            (config.min_interval(), config.max_interval())
        } else {
            (config.max_interval(), config.min_interval())
        };
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            whitelist: Arc::new(WhitelistCache::new(source, config.whitelist_poll())),
            window,
            clock,
            min_interval,
            max_interval,
            prompt: config.prompt.clone(),
            enabled: config.enabled,
            on_greet,
            busy: None,
        }
    }

    /// Skip sessions that `busy` reports as still collecting input. Checked
    /// once the settle delay has passed and again before sending.
    #[must_use]
    pub fn with_busy_check(mut self, busy: BusyFn) -> Self {
        self.busy = Some(busy);
        self
    }

    pub fn whitelist(&self) -> &Arc<WhitelistCache> {
        &self.whitelist
    }

    /// Arm a greeting for `session_id` immediately.
    pub fn arm(self: &Arc<Self>, session_id: &str, context: MessageContext) {
        self.arm_after(session_id, context, Duration::ZERO);
    }

    /// Arm a greeting once `settle` has elapsed.
    ///
    /// Any previously armed greeting for the session is replaced. The
    /// whitelist is consulted after the settle delay; users that are not
    /// listed are left unarmed.
    pub fn arm_after(self: &Arc<Self>, session_id: &str, context: MessageContext, settle: Duration) {
        if !self.enabled {
            return;
        }
        self.install(session_id, context, settle, None);
    }

    /// Cancel the pending greeting for `session_id`. Idempotent.
    ///
    /// A greeting that is already being generated or sent runs to completion
    /// but is not re-armed.
    pub fn disarm(&self, session_id: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let removed = entries.remove(session_id);
            self.record_armed(entries.len());
            removed
        };
        match removed {
            Some(entry) => {
                if let Some(task) = entry.task {
                    task.abort();
                }
                debug!(session_id, "greeting disarmed");
                true
            },
            None => false,
        }
    }

    #[must_use]
    pub fn is_armed(&self, session_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    #[must_use]
    pub fn armed(&self, session_id: &str) -> Option<ArmedGreeting> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .map(|e| ArmedGreeting {
                scheduled_at: e.scheduled_at,
                fire_at: e.fire_at,
            })
    }

    /// Cancel every pending greeting.
    pub fn disarm_all(&self) {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let drained = entries.drain().map(|(_, e)| e).collect();
            self.record_armed(0);
            drained
        };
        for task in drained.into_iter().filter_map(|e| e.task) {
            task.abort();
        }
    }

    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Insert a fresh entry and spawn its timer.
    ///
    /// With `expected` set, the entry is only replaced if it still carries that
    /// generation, so a re-arm after firing cannot resurrect a disarmed session.
    fn install(
        self: &Arc<Self>,
        session_id: &str,
        context: MessageContext,
        settle: Duration,
        expected: Option<u64>,
    ) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(expected) = expected
            && entries.get(session_id).map(|e| e.generation) != Some(expected)
        {
            return false;
        }

        let this = Arc::clone(self);
        let sid = session_id.to_string();
        let settle_until = tokio::time::Instant::now() + settle;
        let task = tokio::spawn(async move {
            this.run_timer(sid, generation, settle_until).await;
        });

        let previous = entries.insert(session_id.to_string(), Entry {
            generation,
            context,
            scheduled_at: self.clock.now(),
            fire_at: None,
            task: Some(task),
        });
        self.record_armed(entries.len());
        drop(entries);

        // A re-arm runs on the previous entry's own task, which must finish.
        if expected.is_none()
            && let Some(task) = previous.and_then(|p| p.task)
        {
            task.abort();
        }
        true
    }

    async fn run_timer(
        self: Arc<Self>,
        session_id: String,
        generation: u64,
        settle_until: tokio::time::Instant,
    ) {
        tokio::time::sleep_until(settle_until).await;

        let Some(context) = self.context_if_current(&session_id, generation) else {
            return;
        };
        if self.is_busy(&session_id) {
            debug!(session_id, "session still buffering, greeting not armed");
            self.remove_if_current(&session_id, generation);
            return;
        }
        if !self.whitelist.contains(&context.user_identifier).await {
            debug!(session_id, user = %context.user_identifier, "user not whitelisted, greeting not armed");
            self.remove_if_current(&session_id, generation);
            return;
        }

        let Some(fire_at) = self.pick_fire_time() else {
            debug!(session_id, "no greeting band configured, greeting not armed");
            self.remove_if_current(&session_id, generation);
            return;
        };
        if !self.set_fire_at(&session_id, generation, fire_at) {
            return;
        }
        debug!(session_id, %fire_at, "greeting armed");

        let wait = (fire_at - self.clock.now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let outcome = self.fire(&session_id, generation).await;
        debug!(session_id, ?outcome, "greeting timer fired");
    }

    /// Random delay in `[min_interval, max_interval]`, snapped forward into
    /// the next allowed band.
    fn pick_fire_time(&self) -> Option<DateTime<Utc>> {
        let min = self.min_interval.as_secs();
        let max = self.max_interval.as_secs();
        let delay = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };
        let candidate = self.clock.now() + chrono::Duration::seconds(i64::try_from(delay).ok()?);
        self.window.next_allowed(candidate)
    }

    async fn fire(self: &Arc<Self>, session_id: &str, generation: u64) -> FireOutcome {
        let Some(context) = self.context_if_current(session_id, generation) else {
            debug!(session_id, "stale greeting timer ignored");
            return FireOutcome::Stale;
        };

        if !self.whitelist.contains(&context.user_identifier).await {
            info!(session_id, user = %context.user_identifier, "user left the greeting whitelist");
            self.remove_if_current(session_id, generation);
            return FireOutcome::NotWhitelisted;
        }

        if self.is_busy(session_id) {
            debug!(session_id, "session still buffering, greeting dropped");
            self.remove_if_current(session_id, generation);
            return FireOutcome::Busy;
        }

        let now = self.clock.now();
        let outcome = if self.window.contains(now) {
            // From here on a disarm must not abort this task mid-send.
            if !self.detach_if_current(session_id, generation) {
                return FireOutcome::Stale;
            }
            let request = GreetingRequest {
                session_id: session_id.to_string(),
                context: context.clone(),
                prompt: self.prompt.clone(),
            };
            match (self.on_greet)(request).await {
                Ok(()) => {
                    info!(session_id, "greeting sent");
                    #[cfg(feature = "metrics")]
                    counter!(greeting_metrics::SENT_TOTAL).increment(1);
                    FireOutcome::Sent
                },
                Err(e) => {
                    warn!(session_id, error = %e, "greeting failed");
                    FireOutcome::Failed
                },
            }
        } else {
            debug!(session_id, %now, "greeting timer outside allowed bands, skipping");
            #[cfg(feature = "metrics")]
            counter!(greeting_metrics::OUT_OF_WINDOW_TOTAL).increment(1);
            FireOutcome::OutOfWindow
        };

        if !self.install(session_id, context, Duration::ZERO, Some(generation)) {
            debug!(session_id, "greeting disarmed while firing, not re-arming");
        }
        outcome
    }

    fn context_if_current(&self, session_id: &str, generation: u64) -> Option<MessageContext> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .filter(|e| e.generation == generation)
            .map(|e| e.context.clone())
    }

    fn is_busy(&self, session_id: &str) -> bool {
        self.busy.as_ref().is_some_and(|busy| busy(session_id))
    }

    /// Drop the entry's task handle so later disarms leave the running task
    /// alone. The entry itself stays, so a re-arm can still find it.
    fn detach_if_current(&self, session_id: &str, generation: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(session_id) {
            Some(e) if e.generation == generation => {
                e.task = None;
                true
            },
            _ => false,
        }
    }

    fn set_fire_at(&self, session_id: &str, generation: u64, fire_at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(session_id) {
            Some(e) if e.generation == generation => {
                e.fire_at = Some(fire_at);
                true
            },
            _ => false,
        }
    }

    fn remove_if_current(&self, session_id: &str, generation: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries
            .get(session_id)
            .is_some_and(|e| e.generation == generation)
        {
            entries.remove(session_id);
            self.record_armed(entries.len());
        }
    }

    #[allow(unused_variables)]
    fn record_armed(&self, count: usize) {
        #[cfg(feature = "metrics")]
        gauge!(greeting_metrics::ARMED).set(count as f64);
    }
}
