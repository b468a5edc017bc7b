//! Per-session query debouncing.
//!
//! Fragments arriving for a session are merged (newline-joined, in arrival
//! order) into a pending query. The query is handed to its flush callback
//! once the session has been quiet for the quiet period, or earlier when the
//! next fragment would push it past the size limit.
//!
//! Locking: the table lock only guards insert/lookup/remove of entries, each
//! entry has its own lock for mutation. Code that needs both takes the entry
//! lock first. Neither lock is held across an await point.
//!
//! Flushes for one session are single-flight and run in the order they were
//! produced; a session's next flush starts only after the previous callback
//! returned.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    parley_config::DebounceConfig,
    tokio::{task::JoinHandle, time::Instant},
    tracing::{debug, error, info},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, debounce as debounce_metrics, gauge};

/// Receives `(session_id, merged_text)` once per flushed query.
pub type FlushFn =
    Arc<dyn Fn(String, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// What [`Debouncer::submit`] did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new pending query was opened.
    Started,
    /// Appended to the open pending query; the quiet period restarted.
    Appended,
    /// The open query was flushed for size and a new one started with the fragment.
    SizeSplit,
    /// Too many sessions buffering; the fragment was flushed on its own.
    Bypassed,
}

struct PendingQuery {
    merged_text: String,
    char_count: usize,
    created_at: Instant,
    last_active_at: Instant,
    generation: u64,
    flush_timer: Option<JoinHandle<()>>,
    on_flush: FlushFn,
    /// Set once the text has been taken; late holders must look the session up again.
    closed: bool,
}

impl PendingQuery {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
    }

    /// Extract the text and mark the entry dead.
    fn close(&mut self) -> (String, FlushFn) {
        self.closed = true;
        self.abort_timer();
        (
            std::mem::take(&mut self.merged_text),
            Arc::clone(&self.on_flush),
        )
    }
}

type Slot = Arc<Mutex<PendingQuery>>;

const IDLE_POLL: Duration = Duration::from_millis(50);

struct QueuedFlush {
    text: String,
    on_flush: FlushFn,
}

pub struct Debouncer {
    pending: Mutex<HashMap<String, Slot>>,
    /// Sessions with a running flush worker, and the flushes queued behind it.
    flushing: Mutex<HashMap<String, VecDeque<QueuedFlush>>>,
    next_generation: AtomicU64,
    quiet_period: Duration,
    max_query_chars: usize,
    max_pending_sessions: usize,
}

impl Debouncer {
    pub fn new(config: &DebounceConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            flushing: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            quiet_period: config.quiet_period(),
            max_query_chars: config.max_query_chars,
            max_pending_sessions: config.max_pending_sessions,
        }
    }

    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Add a fragment to the session's pending query. Never blocks on I/O.
    pub fn submit(
        self: &Arc<Self>,
        session_id: &str,
        fragment: &str,
        on_flush: FlushFn,
    ) -> SubmitOutcome {
        #[cfg(feature = "metrics")]
        counter!(debounce_metrics::FRAGMENTS_TOTAL).increment(1);

        let fragment_chars = fragment.chars().count();
        loop {
            let slot = {
                let mut pending = self.lock_pending();
                match pending.get(session_id) {
                    Some(slot) => Arc::clone(slot),
                    None if pending.len() >= self.max_pending_sessions => {
                        drop(pending);
                        info!(
                            session_id,
                            max = self.max_pending_sessions,
                            "debounce table full, flushing fragment immediately"
                        );
                        #[cfg(feature = "metrics")]
                        counter!(debounce_metrics::CAPACITY_BYPASS_TOTAL).increment(1);
                        self.dispatch(session_id, fragment.to_string(), on_flush);
                        return SubmitOutcome::Bypassed;
                    },
                    None => {
                        let slot = self.open(session_id, fragment, fragment_chars, on_flush);
                        pending.insert(session_id.to_string(), slot);
                        self.record_pending(pending.len());
                        debug!(session_id, "pending query opened");
                        return SubmitOutcome::Started;
                    },
                }
            };

            let mut query = slot.lock().unwrap_or_else(|e| e.into_inner());
            if query.closed {
                // Flushed between the table lookup and taking the entry lock.
                continue;
            }

            if query.char_count + fragment_chars > self.max_query_chars {
                let (text, previous_flush) = query.close();
                debug!(
                    session_id,
                    flushed_chars = text.chars().count(),
                    "pending query reached size limit"
                );
                #[cfg(feature = "metrics")]
                counter!(debounce_metrics::SIZE_SPLITS_TOTAL).increment(1);
                // Queue the old text before the replacement becomes visible, so a
                // split of the replacement cannot overtake it.
                self.dispatch(session_id, text, previous_flush);

                let replacement = self.open(session_id, fragment, fragment_chars, on_flush);
                {
                    let mut pending = self.lock_pending();
                    pending.insert(session_id.to_string(), replacement);
                }
                drop(query);
                return SubmitOutcome::SizeSplit;
            }

            query.merged_text.push('\n');
            query.merged_text.push_str(fragment);
            query.char_count += fragment_chars;
            query.last_active_at = Instant::now();
            query.on_flush = on_flush;
            query.abort_timer();
            query.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            query.flush_timer = Some(self.spawn_timer(session_id, query.generation));
            return SubmitOutcome::Appended;
        }
    }

    /// Whether the session has an open pending query.
    #[must_use]
    pub fn is_buffering(&self, session_id: &str) -> bool {
        let Some(slot) = self.lock_pending().get(session_id).map(Arc::clone) else {
            return false;
        };
        // A closed entry is already on its way out of the table.
        !slot.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Whether a flush callback is running (or queued) for the session.
    #[must_use]
    pub fn is_flushing(&self, session_id: &str) -> bool {
        self.flushing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Sessions with a flush callback running or queued.
    #[must_use]
    pub fn flushing_count(&self) -> usize {
        self.flushing.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until nothing is buffered and no flush callback is running.
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.pending_count() == 0 && self.flushing_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Discard pending queries idle for longer than `max_age`, without
    /// flushing them. Returns the affected session ids.
    pub fn reap(&self, max_age: Duration) -> Vec<String> {
        let candidates: Vec<(String, Slot)> = self
            .lock_pending()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut reaped = Vec::new();
        for (session_id, slot) in candidates {
            let mut query = slot.lock().unwrap_or_else(|e| e.into_inner());
            if query.closed || query.last_active_at.elapsed() <= max_age {
                continue;
            }
            let (text, _) = query.close();
            let mut pending = self.lock_pending();
            if pending
                .get(&session_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                pending.remove(&session_id);
                self.record_pending(pending.len());
            }
            drop(pending);
            drop(query);

            info!(
                session_id = %session_id,
                dropped_chars = text.chars().count(),
                "discarded stale pending query"
            );
            #[cfg(feature = "metrics")]
            counter!(debounce_metrics::REAPED_TOTAL).increment(1);
            reaped.push(session_id);
        }
        reaped
    }

    fn open(
        self: &Arc<Self>,
        session_id: &str,
        fragment: &str,
        fragment_chars: usize,
        on_flush: FlushFn,
    ) -> Slot {
        let now = Instant::now();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Arc::new(Mutex::new(PendingQuery {
            merged_text: fragment.to_string(),
            char_count: fragment_chars,
            created_at: now,
            last_active_at: now,
            generation,
            flush_timer: Some(self.spawn_timer(session_id, generation)),
            on_flush,
            closed: false,
        }))
    }

    fn spawn_timer(self: &Arc<Self>, session_id: &str, generation: u64) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        let deadline = Instant::now() + self.quiet_period;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            this.flush_if_current(&session_id, generation);
        })
    }

    /// Timer expiry: flush only if the entry still carries `generation`.
    fn flush_if_current(self: &Arc<Self>, session_id: &str, generation: u64) {
        let Some(slot) = self.lock_pending().get(session_id).map(Arc::clone) else {
            debug!(session_id, "flush timer fired for a removed query");
            return;
        };

        let mut query = slot.lock().unwrap_or_else(|e| e.into_inner());
        if query.closed || query.generation != generation {
            debug!(session_id, generation, "stale flush timer ignored");
            return;
        }
        // The timer is the task running this code; detach instead of aborting it.
        query.flush_timer = None;
        let buffered_for = query.created_at.elapsed();
        let (text, on_flush) = query.close();
        debug!(
            session_id,
            chars = text.chars().count(),
            buffered_ms = buffered_for.as_millis() as u64,
            "quiet period elapsed, flushing"
        );
        // Queued while the entry is still locked and in the table, so the next
        // pending query for the session always flushes after this one.
        self.dispatch(session_id, text, on_flush);

        let mut pending = self.lock_pending();
        if pending
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            pending.remove(session_id);
            self.record_pending(pending.len());
        }
        drop(pending);
        drop(query);
    }

    /// Run `on_flush` for the session, after any flush already in progress.
    fn dispatch(self: &Arc<Self>, session_id: &str, text: String, on_flush: FlushFn) {
        {
            let mut flushing = self.flushing.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(queue) = flushing.get_mut(session_id) {
                queue.push_back(QueuedFlush { text, on_flush });
                return;
            }
            flushing.insert(session_id.to_string(), VecDeque::new());
        }

        let this = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            this.drain_flushes(session_id, QueuedFlush { text, on_flush })
                .await;
        });
    }

    async fn drain_flushes(self: Arc<Self>, session_id: String, first: QueuedFlush) {
        let mut next = first;
        loop {
            #[cfg(feature = "metrics")]
            counter!(debounce_metrics::FLUSHES_TOTAL).increment(1);

            // Run the callback on its own task so a panic cannot wedge the queue.
            let QueuedFlush { text, on_flush } = next;
            let call = tokio::spawn(on_flush(session_id.clone(), text));
            if let Err(e) = call.await {
                error!(session_id = %session_id, error = %e, "flush callback panicked");
            }

            let queued = {
                let mut flushing = self.flushing.lock().unwrap_or_else(|e| e.into_inner());
                let queued = flushing.get_mut(&session_id).and_then(VecDeque::pop_front);
                if queued.is_none() {
                    flushing.remove(&session_id);
                }
                queued
            };
            match queued {
                Some(queued) => next = queued,
                None => return,
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[allow(unused_variables)]
    fn record_pending(&self, count: usize) {
        #[cfg(feature = "metrics")]
        gauge!(debounce_metrics::PENDING_SESSIONS).set(count as f64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    type Flushed = Arc<Mutex<Vec<(String, String)>>>;

    fn recorder() -> (FlushFn, Flushed) {
        let flushed: Flushed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flushed);
        let f: FlushFn = Arc::new(move |sid: String, text: String| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push((sid, text));
            })
        });
        (f, flushed)
    }

    fn debouncer(quiet_secs: u64, max_chars: usize, max_sessions: usize) -> Arc<Debouncer> {
        Arc::new(Debouncer::new(&DebounceConfig {
            quiet_period_secs: quiet_secs,
            max_query_chars: max_chars,
            max_pending_sessions: max_sessions,
        }))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn texts(flushed: &Flushed) -> Vec<String> {
        flushed.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_fragments_within_quiet_period() {
        let d = debouncer(15, 1000, 100);
        let (f, flushed) = recorder();

        assert_eq!(d.submit("s1", "a", Arc::clone(&f)), SubmitOutcome::Started);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(d.submit("s1", "b", Arc::clone(&f)), SubmitOutcome::Appended);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(d.submit("s1", "c", Arc::clone(&f)), SubmitOutcome::Appended);

        tokio::time::advance(Duration::from_secs(16)).await;
        settle().await;
        assert_eq!(*flushed.lock().unwrap(), vec![(
            "s1".to_string(),
            "a\nb\nc".to_string()
        )]);
        assert!(!d.is_buffering("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn lone_fragment_flushes_after_exactly_the_quiet_period() {
        let d = debouncer(15, 1000, 100);
        let (f, flushed) = recorder();
        d.submit("s1", "hello", f);
        settle().await;

        tokio::time::advance(Duration::from_millis(14_999)).await;
        settle().await;
        assert!(flushed.lock().unwrap().is_empty());
        assert!(d.is_buffering("s1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn size_limit_splits_into_two_flushes() {
        let d = debouncer(15, 1000, 100);
        let (f, flushed) = recorder();
        let first = "x".repeat(900);
        let second = "y".repeat(200);

        d.submit("s1", &first, Arc::clone(&f));
        assert_eq!(d.submit("s1", &second, Arc::clone(&f)), SubmitOutcome::SizeSplit);
        settle().await;
        assert_eq!(texts(&flushed), vec![first.clone()]);
        assert!(d.is_buffering("s1"));

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec![first, second]);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_limit_is_not_split() {
        let d = debouncer(15, 10, 100);
        let (f, flushed) = recorder();
        d.submit("s1", "12345", Arc::clone(&f));
        assert_eq!(d.submit("s1", "67890", Arc::clone(&f)), SubmitOutcome::Appended);
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec!["12345\n67890".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_fragment_is_kept_whole() {
        let d = debouncer(15, 10, 100);
        let (f, flushed) = recorder();
        let long = "z".repeat(25);
        assert_eq!(d.submit("s1", &long, f), SubmitOutcome::Started);
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec![long]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fragments_flush_once_without_loss() {
        let d = debouncer(15, 100_000, 100);
        let (f, flushed) = recorder();

        let mut handles = Vec::new();
        for i in 0..50 {
            let d = Arc::clone(&d);
            let f = Arc::clone(&f);
            handles.push(tokio::spawn(async move {
                d.submit("s1", &format!("m{i}"), f);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        let all = texts(&flushed);
        assert_eq!(all.len(), 1);
        let mut lines: Vec<&str> = all[0].split('\n').collect();
        assert_eq!(lines.len(), 50);
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_fragments_keep_arrival_order() {
        let d = debouncer(15, 100_000, 100);
        let (f, flushed) = recorder();
        let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
        for line in &expected {
            d.submit("s1", line, Arc::clone(&f));
        }
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec![expected.join("\n")]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_table_bypasses_buffering() {
        let d = debouncer(15, 1000, 1);
        let (f, flushed) = recorder();

        assert_eq!(d.submit("A", "from a", Arc::clone(&f)), SubmitOutcome::Started);
        assert_eq!(d.submit("B", "from b", Arc::clone(&f)), SubmitOutcome::Bypassed);
        settle().await;
        assert_eq!(*flushed.lock().unwrap(), vec![(
            "B".to_string(),
            "from b".to_string()
        )]);
        assert!(!d.is_buffering("B"));
        // A session already buffering keeps appending.
        assert_eq!(d.submit("A", "more", Arc::clone(&f)), SubmitOutcome::Appended);

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec![
            "from b".to_string(),
            "from a\nmore".to_string()
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_are_independent() {
        let d = debouncer(15, 1000, 100);
        let (f, flushed) = recorder();
        d.submit("s1", "one", Arc::clone(&f));
        tokio::time::advance(Duration::from_secs(10)).await;
        d.submit("s2", "two", Arc::clone(&f));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec!["one".to_string()]);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_for_a_session_are_single_flight_and_ordered() {
        let d = debouncer(0, 5, 100);
        let active = Arc::new(AtomicU64::new(0));
        let max_active = Arc::new(AtomicU64::new(0));
        let order = Arc::new(Mutex::new(Vec::<String>::new()));

        let f: FlushFn = {
            let (active, max_active, order) =
                (Arc::clone(&active), Arc::clone(&max_active), Arc::clone(&order));
            Arc::new(move |_sid: String, text: String| {
                let (active, max_active, order) =
                    (Arc::clone(&active), Arc::clone(&max_active), Arc::clone(&order));
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    order.lock().unwrap().push(text);
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
        };

        // Every fragment overflows the 5-char limit, so each one splits.
        for word in ["aaaa", "bbbb", "cccc", "dddd"] {
            d.submit("s1", word, Arc::clone(&f));
        }
        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(2)).await;
            settle().await;
        }

        assert_eq!(*order.lock().unwrap(), vec!["aaaa", "bbbb", "cccc", "dddd"]);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!d.is_flushing("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reap_discards_without_flushing() {
        let d = debouncer(600, 1000, 100);
        let (f, flushed) = recorder();
        d.submit("old", "stale", Arc::clone(&f));
        tokio::time::advance(Duration::from_secs(250)).await;
        d.submit("new", "fresh", Arc::clone(&f));
        tokio::time::advance(Duration::from_secs(51)).await;

        let reaped = d.reap(Duration::from_secs(300));
        assert_eq!(reaped, vec!["old".to_string()]);
        assert!(!d.is_buffering("old"));
        assert!(d.is_buffering("new"));

        // The reaped timer must not fire later.
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(texts(&flushed), vec!["fresh".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_does_not_block_the_session() {
        let d = debouncer(0, 1000, 100);
        let calls = Arc::new(AtomicU64::new(0));
        let f: FlushFn = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_sid: String, text: String| {
                let calls = Arc::clone(&calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if text == "boom" {
                        panic!("callback failure");
                    }
                })
            })
        };
        d.submit("s1", "boom", Arc::clone(&f));
        settle().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        d.submit("s1", "fine", Arc::clone(&f));
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!d.is_flushing("s1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_splits_flush_in_submission_order() {
        // Every fragment after the first forces a size split.
        let d = debouncer(1, 10, 100);
        let (f, flushed) = recorder();

        let mut handles = Vec::new();
        for task in 0..4 {
            let d = Arc::clone(&d);
            let f = Arc::clone(&f);
            handles.push(tokio::spawn(async move {
                for i in 0..40 {
                    d.submit("s1", &format!("t{task}-{i:03}"), Arc::clone(&f));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(d.wait_idle(Duration::from_secs(10)).await);

        let all = texts(&flushed);
        assert_eq!(all.len(), 160);
        for task in 0..4 {
            let prefix = format!("t{task}-");
            let seen: Vec<&String> = all.iter().filter(|t| t.starts_with(&prefix)).collect();
            assert_eq!(seen.len(), 40);
            assert!(
                seen.windows(2).all(|w| w[0] < w[1]),
                "task {task} flushed out of order: {seen:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_covers_running_callbacks() {
        let d = debouncer(15, 1000, 100);
        let done = Arc::new(Mutex::new(Vec::new()));
        let f: FlushFn = {
            let done = Arc::clone(&done);
            Arc::new(move |_sid: String, text: String| {
                let done = Arc::clone(&done);
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    done.lock().unwrap().push(text);
                })
            })
        };
        d.submit("s1", "slow", f);
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;

        assert_eq!(d.pending_count(), 0);
        assert_eq!(d.flushing_count(), 1);
        assert!(!d.wait_idle(Duration::from_secs(1)).await);

        assert!(d.wait_idle(Duration::from_secs(30)).await);
        assert_eq!(*done.lock().unwrap(), vec!["slow".to_string()]);
        assert_eq!(d.flushing_count(), 0);
    }
}
