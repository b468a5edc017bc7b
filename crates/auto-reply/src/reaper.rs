//! Periodic cleanup of pending queries whose flush never happened.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    parley_config::ReaperConfig,
    parley_greeting::GreetingScheduler,
    tokio::{task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::debounce::Debouncer;

pub struct Reaper {
    debouncer: Arc<Debouncer>,
    greetings: Option<Arc<GreetingScheduler>>,
    max_age: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Option<Instant>>,
}

impl Reaper {
    pub fn new(
        config: &ReaperConfig,
        debouncer: Arc<Debouncer>,
        greetings: Option<Arc<GreetingScheduler>>,
    ) -> Self {
        Self {
            debouncer,
            greetings,
            max_age: config.max_age(),
            sweep_interval: config.sweep_interval(),
            last_sweep: Mutex::new(None),
        }
    }

    /// Discard stale pending queries and disarm their greetings.
    pub fn sweep(&self) -> Vec<String> {
        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        let reaped = self.debouncer.reap(self.max_age);
        if let Some(greetings) = &self.greetings {
            for session_id in &reaped {
                greetings.disarm(session_id);
            }
        }
        if reaped.is_empty() {
            debug!("reaper sweep found nothing stale");
        } else {
            info!(count = reaped.len(), "reaper discarded stale sessions");
        }
        reaped
    }

    /// Sweep unless one ran within the last sweep interval.
    pub fn maybe_sweep(&self) -> Option<Vec<String>> {
        {
            let last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| at.elapsed() < self.sweep_interval) {
                return None;
            }
        }
        Some(self.sweep())
    }

    /// Sweep every interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("reaper stopped");
                        break;
                    },
                    _ = ticker.tick() => {
                        self.sweep();
                    },
                }
            }
        })
    }
}
