//! Sequenced text buffering with throttled transcript publication.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::DEFAULT_THROTTLE_INTERVAL;
use crate::model::TextFragment;

/// Externally observable transcript state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transcript {
    /// Fragments ordered by sequence and concatenated.
    pub text: String,
    /// Number of updates published so far.
    pub revision: u64,
}

#[derive(Default)]
struct AccumulatorState {
    visible: Vec<TextFragment>,
    pending: Vec<TextFragment>,
    timer: Option<JoinHandle<()>>,
    // Bumped on reset so timers scheduled before it never publish after it.
    epoch: u64,
    revision: u64,
}

/// Buffers text fragments for the current run and publishes the ordered
/// transcript at a bounded cadence.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct ContentAccumulator {
    inner: Arc<Inner>,
}

struct Inner {
    interval: Duration,
    state: Mutex<AccumulatorState>,
    tx: watch::Sender<Transcript>,
}

impl Default for ContentAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}

impl ContentAccumulator {
    pub fn new(interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(Transcript::default());
        Self {
            inner: Arc::new(Inner {
                interval,
                state: Mutex::new(AccumulatorState::default()),
                tx,
            }),
        }
    }

    /// Queues a fragment and schedules a flush if none is pending.
    ///
    /// Returns true when the fragment starts a new assistant segment, i.e. the
    /// buffer held nothing before this push. Must be called from within a
    /// tokio runtime.
    pub fn push(&self, fragment: TextFragment) -> bool {
        let mut state = self.lock();
        let starts_segment = state.visible.is_empty() && state.pending.is_empty();
        state.pending.push(fragment);
        if state.timer.is_none() {
            let epoch = state.epoch;
            let weak = Arc::downgrade(&self.inner);
            let interval = self.inner.interval;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                if let Some(inner) = weak.upgrade() {
                    inner.flush_epoch(Some(epoch));
                }
            }));
        }
        starts_segment
    }

    /// Publishes pending fragments now. No-op when nothing is pending.
    pub fn flush(&self) {
        self.inner.flush_epoch(None);
    }

    /// Clears every fragment, cancels the scheduled flush and publishes an
    /// empty transcript.
    pub fn reset(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.epoch = state.epoch.wrapping_add(1);
        let had_content = !state.visible.is_empty() || !state.pending.is_empty();
        state.visible.clear();
        state.pending.clear();
        if had_content {
            state.revision += 1;
            let revision = state.revision;
            drop(state);
            self.inner.tx.send_replace(Transcript {
                text: String::new(),
                revision,
            });
        }
    }

    /// Ordered transcript of everything flushed so far.
    pub fn transcript(&self) -> String {
        render(&self.lock().visible)
    }

    /// Number of transcript updates published so far.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// True when no fragment is visible or pending.
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.visible.is_empty() && state.pending.is_empty()
    }

    /// Receiver observing every published transcript update.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.inner.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, AccumulatorState> {
        self.inner.lock()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, AccumulatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_epoch(&self, scheduled_for: Option<u64>) {
        let mut state = self.lock();
        if let Some(epoch) = scheduled_for {
            if epoch != state.epoch {
                trace!(epoch, current = state.epoch, "dropping flush scheduled before reset");
                return;
            }
            // The timer is running this flush; it no longer needs aborting.
            state.timer = None;
        } else if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut state.pending);
        state.visible.extend(pending);
        state.revision += 1;
        let transcript = Transcript {
            text: render(&state.visible),
            revision: state.revision,
        };
        drop(state);
        self.tx.send_replace(transcript);
    }
}

/// Sorts by sequence (unsequenced fragments last, ties stable) and concatenates.
pub fn render(fragments: &[TextFragment]) -> String {
    let mut ordered: Vec<&TextFragment> = fragments.iter().collect();
    ordered.sort_by_key(|fragment| (fragment.sequence.is_none(), fragment.sequence.unwrap_or(0)));
    ordered
        .into_iter()
        .map(|fragment| fragment.content.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(content: &str, sequence: Option<i64>) -> TextFragment {
        TextFragment::new(content, sequence)
    }

    #[test]
    fn render_orders_by_sequence_regardless_of_arrival() {
        let fragments = vec![frag("c", Some(3)), frag("a", Some(1)), frag("b", Some(2))];
        assert_eq!(render(&fragments), "abc");
    }

    #[test]
    fn render_places_unsequenced_last_and_keeps_ties_stable() {
        let fragments = vec![
            frag("x", None),
            frag("b1", Some(2)),
            frag("a", Some(1)),
            frag("y", None),
            frag("b2", Some(2)),
        ];
        assert_eq!(render(&fragments), "ab1b2xy");
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_within_one_window_publish_once() {
        let acc = ContentAccumulator::new(Duration::from_millis(16));
        assert!(acc.push(frag("c", Some(3))));
        assert!(!acc.push(frag("a", Some(1))));
        assert!(!acc.push(frag("b", Some(2))));
        assert_eq!(acc.revision(), 0);
        assert_eq!(acc.transcript(), "");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(acc.revision(), 1);
        assert_eq!(acc.transcript(), "abc");
        assert_eq!(acc.subscribe().borrow().text, "abc");

        // A later window gets its own single update.
        acc.push(frag("d", Some(4)));
        acc.push(frag("e", Some(5)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(acc.revision(), 2);
        assert_eq!(acc.transcript(), "abcde");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_idempotent() {
        let acc = ContentAccumulator::new(Duration::from_millis(16));
        acc.flush();
        assert_eq!(acc.revision(), 0);

        acc.push(frag("hi", Some(1)));
        acc.flush();
        acc.flush();
        assert_eq!(acc.revision(), 1);
        assert_eq!(acc.transcript(), "hi");

        // The manual flush cancelled the timer armed by the push.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(acc.revision(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_and_fences_scheduled_flush() {
        let acc = ContentAccumulator::new(Duration::from_millis(16));
        acc.push(frag("one", Some(1)));
        acc.flush();
        acc.push(frag("two", Some(2)));
        acc.reset();
        assert_eq!(acc.transcript(), "");
        assert!(acc.is_empty());
        let after_reset = acc.revision();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(acc.revision(), after_reset);
        assert_eq!(acc.subscribe().borrow().text, "");

        // The next push starts a fresh segment.
        assert!(acc.push(frag("three", Some(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_length_never_shrinks_while_streaming() {
        let acc = ContentAccumulator::new(Duration::from_millis(16));
        let mut last_len = 0;
        for (content, seq) in [("lo", 2), ("hel", 1), (" world", 3), ("!", 5), ("?", 4)] {
            acc.push(frag(content, Some(seq)));
            tokio::time::sleep(Duration::from_millis(20)).await;
            let len = acc.transcript().len();
            assert!(len >= last_len);
            last_len = len;
        }
        assert_eq!(acc.transcript(), "hello world?!");
    }
}
