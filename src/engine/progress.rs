//! Debounced progress persistence
//!
//! Location changes arrive on every page turn; writing each one through to
//! storage would hammer the caller's database. The tracker debounces writes
//! (~5 s) and guarantees a final flush on teardown so no progress is lost.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use super::location::PersistedLocation;
use crate::timing::{Debouncer, PROGRESS_DEBOUNCE};

/// Sink receiving persisted location strings and progress values.
pub type ProgressSink = Arc<dyn Fn(&PersistedLocation, f32) + Send + Sync>;

struct State {
    pending: Option<(PersistedLocation, f32)>,
    debouncer: Debouncer,
    closed: bool,
}

/// Debounced writer of reading progress through a caller-provided sink.
pub struct ProgressTracker {
    sink: ProgressSink,
    state: Mutex<State>,
}

impl ProgressTracker {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            sink,
            state: Mutex::new(State {
                pending: None,
                debouncer: Debouncer::new(PROGRESS_DEBOUNCE),
                closed: false,
            }),
        }
    }

    /// Record a location change. The write happens once the debounce window
    /// elapses (via [`ProgressTracker::tick`]) or at [`ProgressTracker::flush`].
    pub fn record(&self, location: PersistedLocation, progress: f32, now: Instant) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.pending = Some((location, progress.clamp(0.0, 1.0)));
        state.debouncer.trigger(now);
    }

    /// Drive the debounce window; writes through when it has elapsed.
    pub fn tick(&self, now: Instant) {
        let flushed = {
            let mut state = self.state.lock();
            if state.closed || !state.debouncer.fire(now) {
                None
            } else {
                state.pending.take()
            }
        };
        if let Some((location, progress)) = flushed {
            (self.sink)(&location, progress);
        }
    }

    /// Write any pending progress immediately. Called on teardown; the
    /// tracker accepts no further records afterwards.
    pub fn flush(&self) {
        let flushed = {
            let mut state = self.state.lock();
            state.closed = true;
            state.debouncer.cancel();
            state.pending.take()
        };
        if let Some((location, progress)) = flushed {
            debug!(%location, progress, "final progress flush");
            (self.sink)(&location, progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tracker() -> (ProgressTracker, Arc<Mutex<Vec<(String, f32)>>>, Arc<AtomicUsize>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let w = writes.clone();
        let c = count.clone();
        let tracker = ProgressTracker::new(Arc::new(move |loc, p| {
            w.lock().push((loc.to_string(), p));
            c.fetch_add(1, Ordering::SeqCst);
        }));
        (tracker, writes, count)
    }

    #[test]
    fn debounces_bursts_to_one_write() {
        let (tracker, writes, count) = tracker();
        let base = Instant::now();
        for i in 0..20 {
            tracker.record(
                PersistedLocation::Page(i),
                i as f32 / 20.0,
                base + Duration::from_millis(i as u64 * 100),
            );
        }
        tracker.tick(base + Duration::from_secs(3));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // 5 s after the last record the debounce window elapses.
        tracker.tick(base + Duration::from_secs(7));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(writes.lock().last().unwrap().0, "page-19");
    }

    #[test]
    fn flush_writes_pending_and_closes() {
        let (tracker, writes, count) = tracker();
        let base = Instant::now();
        tracker.record(PersistedLocation::Spine(2), 0.4, base);
        tracker.flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(writes.lock()[0], ("spine-2".to_string(), 0.4));

        // Closed: later records and flushes are dropped.
        tracker.record(PersistedLocation::Page(9), 0.9, base);
        tracker.flush();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn progress_is_clamped() {
        let (tracker, writes, _) = tracker();
        tracker.record(PersistedLocation::Page(0), 1.7, Instant::now());
        tracker.flush();
        assert_eq!(writes.lock()[0].1, 1.0);
    }
}
