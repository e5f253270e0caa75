//! Rate-limited batching of script output into a sink.
//!
//! Child processes often write in many tiny bursts. [`StreamBuffer`] collects
//! them and hands the sink one larger write at a time, bounded both in delay
//! (flush interval) and in memory (flush threshold). After every delivery the
//! sink is trimmed to the most recent `max_sink_chars` characters.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::FlushPolicy;
use crate::sink::SharedSink;

#[derive(Debug, Default)]
struct Pending {
    text: String,
    /// `None` until the first delivery, so the very first output shows at once.
    last_flush: Option<Instant>,
}

/// Accumulator between a running script and its [`OutputSink`](crate::sink::OutputSink).
///
/// Shared by the output reader thread and the script's sequencer. Deliveries
/// happen while the accumulator lock is held, so the sink never sees two
/// concurrent writes from one buffer and chunks arrive in append order.
pub struct StreamBuffer {
    pending: Mutex<Pending>,
    sink: SharedSink,
    policy: FlushPolicy,
}

impl StreamBuffer {
    pub fn new(sink: SharedSink, policy: FlushPolicy) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            sink,
            policy,
        }
    }

    /// Queue `text` and deliver if the interval or size threshold is exceeded.
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut pending = self.lock();
        pending.text.push_str(text);
        if self.interval_elapsed(&pending) || pending.text.len() > self.policy.threshold {
            self.deliver(&mut pending);
        }
    }

    /// Deliver pending text unconditionally.
    pub fn flush(&self) {
        let mut pending = self.lock();
        self.deliver(&mut pending);
    }

    /// Deliver pending text only if the flush interval has elapsed.
    ///
    /// Lets a periodic caller push out output from a producer that went quiet.
    pub fn flush_if_due(&self) {
        let mut pending = self.lock();
        if self.interval_elapsed(&pending) {
            self.deliver(&mut pending);
        }
    }

    /// Bytes waiting for the next delivery.
    pub fn pending_len(&self) -> usize {
        self.lock().text.len()
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    fn interval_elapsed(&self, pending: &Pending) -> bool {
        pending
            .last_flush
            .is_none_or(|at| at.elapsed() > self.policy.interval)
    }

    fn deliver(&self, pending: &mut Pending) {
        if pending.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut pending.text);
        pending.last_flush = Some(Instant::now());

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.append(&text);
        let len = sink.len();
        if len > self.policy.max_sink_chars {
            sink.discard_front(len - self.policy.max_sink_chars);
        }
        tracing::trace!(bytes = text.len(), sink_chars = sink.len(), "Flushed output");
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::sink::{OutputSink, OutputWindow};

    fn policy(interval: Duration, threshold: usize, max_sink_chars: usize) -> FlushPolicy {
        FlushPolicy {
            interval,
            threshold,
            max_sink_chars,
        }
    }

    fn buffer_with(policy: FlushPolicy) -> (StreamBuffer, Arc<Mutex<OutputWindow>>) {
        let window = OutputWindow::shared();
        (StreamBuffer::new(window.clone(), policy), window)
    }

    fn contents(window: &Arc<Mutex<OutputWindow>>) -> String {
        window.lock().expect("lock").snapshot()
    }

    #[test]
    fn first_append_is_delivered_immediately() {
        let (buffer, window) = buffer_with(policy(Duration::from_secs(3600), 4096, 10_000));
        buffer.append("hello\n");
        assert_eq!(contents(&window), "hello\n");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn small_appends_wait_for_interval() {
        let (buffer, window) = buffer_with(policy(Duration::from_secs(3600), 4096, 10_000));
        buffer.append("a");
        buffer.append("b");
        buffer.append("c");
        assert_eq!(contents(&window), "a");
        assert_eq!(buffer.pending_len(), 2);

        buffer.flush_if_due();
        assert_eq!(contents(&window), "a", "interval has not elapsed");

        buffer.flush();
        assert_eq!(contents(&window), "abc");
    }

    #[test]
    fn threshold_forces_delivery() {
        let (buffer, window) = buffer_with(policy(Duration::from_secs(3600), 8, 10_000));
        buffer.append("x");
        buffer.append("12345678");
        assert_eq!(buffer.pending_len(), 8, "exactly at threshold stays pending");
        buffer.append("9");
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(contents(&window), "x123456789");
    }

    #[test]
    fn elapsed_interval_delivers_on_next_append_or_tick() {
        let (buffer, window) = buffer_with(policy(Duration::from_millis(20), 4096, 10_000));
        buffer.append("first ");
        buffer.append("second ");
        std::thread::sleep(Duration::from_millis(40));
        buffer.flush_if_due();
        assert_eq!(contents(&window), "first second ");

        buffer.append("third");
        std::thread::sleep(Duration::from_millis(40));
        buffer.append("!");
        assert_eq!(contents(&window), "first second third!");
    }

    #[test]
    fn flush_with_nothing_pending_leaves_sink_untouched() {
        let (buffer, window) = buffer_with(FlushPolicy::default());
        buffer.flush();
        buffer.flush_if_due();
        assert_eq!(contents(&window), "");
    }

    #[test]
    fn sink_keeps_only_most_recent_characters() {
        let max = 1000;
        let (buffer, window) = buffer_with(policy(Duration::from_secs(3600), 64, max));

        let mut full = String::new();
        for i in 0..500 {
            let line = format!("line {i:04}\n");
            full.push_str(&line);
            buffer.append(&line);
            assert!(window.lock().expect("lock").len() <= max);
        }
        buffer.flush();

        let retained = contents(&window);
        assert_eq!(retained.chars().count(), max);
        assert!(full.ends_with(&retained), "retained text must be a suffix of the full output");
    }

    #[test]
    fn concurrent_appends_are_all_delivered_in_order_per_thread() {
        let (buffer, window) = buffer_with(policy(Duration::from_millis(1), 32, 1_000_000));
        let buffer = Arc::new(buffer);

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|tag| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        buffer.append(&format!("{tag}{i};"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        buffer.flush();

        let text = contents(&window);
        for tag in ["a", "b"] {
            let seen: Vec<u32> = text
                .split(';')
                .filter_map(|item| item.strip_prefix(tag))
                .map(|n| n.parse().expect("number"))
                .collect();
            assert_eq!(seen, (0..200).collect::<Vec<_>>());
        }
    }
}
