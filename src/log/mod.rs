//! Durable broadcast log
//!
//! An append-only, totally ordered sequence of envelopes with any number of
//! independent reader cursors. The single writer is never blocked by reader
//! lag: retention is a fixed entry budget, and a reader that falls behind it
//! resumes at the oldest retained entry with the gap reported in the batch
//! rather than raised as an error. This mirrors the capped-stream semantics
//! the pipeline was designed around.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// One positioned entry in the log
///
/// Payload is the JSON representation of one upstream feed message. Cloning
/// is cheap; the payload is shared.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Monotonically increasing log position
    pub seq: u64,
    /// Opaque payload, immutable once appended
    pub payload: Arc<str>,
    /// When the writer appended this entry
    pub appended_at: Instant,
}

/// Where a new reader cursor starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Only entries appended after the reader is created ("from now")
    Latest,
    /// A specific log position; positions older than the retention window
    /// resume at the oldest retained entry
    Seq(u64),
}

/// Result of one read call
#[derive(Debug, Default)]
pub struct ReadBatch {
    /// Entries in strict log order
    pub entries: Vec<Envelope>,
    /// Number of entries evicted before the cursor could observe them
    ///
    /// Non-zero means the reader lapped the retention window; it has resumed
    /// at the oldest retained entry.
    pub skipped: u64,
}

impl ReadBatch {
    /// True when the read timed out with no new data (keep-alive point)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct LogState {
    entries: VecDeque<Envelope>,
    /// Sequence the next append will receive
    next_seq: u64,
}

impl LogState {
    fn first_seq(&self) -> u64 {
        self.entries.front().map(|e| e.seq).unwrap_or(self.next_seq)
    }
}

struct Shared {
    state: Mutex<LogState>,
    notify: Notify,
    retention: usize,
}

/// Append-only broadcast log handle
///
/// Clones share the same log. Readers are created with [`BroadcastLog::reader`]
/// and poll independently.
#[derive(Clone)]
pub struct BroadcastLog {
    shared: Arc<Shared>,
}

impl BroadcastLog {
    /// Create a log retaining at most `retention` trailing entries
    pub fn new(retention: usize) -> Self {
        assert!(retention > 0, "retention must be at least 1");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LogState {
                    entries: VecDeque::new(),
                    next_seq: 0,
                }),
                notify: Notify::new(),
                retention,
            }),
        }
    }

    /// Append one payload and return its position
    ///
    /// Synchronous and wait-free with respect to readers; eviction happens
    /// inline on the writer side and never blocks on reader cursors.
    pub fn append(&self, payload: impl Into<Arc<str>>) -> u64 {
        let seq = {
            let mut state = self.shared.state.lock().expect("log lock poisoned");
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push_back(Envelope {
                seq,
                payload: payload.into(),
                appended_at: Instant::now(),
            });
            while state.entries.len() > self.shared.retention {
                state.entries.pop_front();
                metrics::counter!("tickflow_log_entries_evicted_total").increment(1);
            }
            seq
        };
        self.shared.notify.notify_waiters();
        seq
    }

    /// Create an independent reader cursor
    pub fn reader(&self, from: ReadFrom) -> LogReader {
        let next = match from {
            ReadFrom::Latest => self.shared.state.lock().expect("log lock poisoned").next_seq,
            ReadFrom::Seq(seq) => seq,
        };
        LogReader {
            log: self.clone(),
            next,
        }
    }

    /// Position the next append will receive
    pub fn next_seq(&self) -> u64 {
        self.shared.state.lock().expect("log lock poisoned").next_seq
    }

    /// Number of currently retained entries
    pub fn len(&self) -> usize {
        self.shared.state.lock().expect("log lock poisoned").entries.len()
    }

    /// True when nothing has been retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Independent cursor over a [`BroadcastLog`]
pub struct LogReader {
    log: BroadcastLog,
    next: u64,
}

impl LogReader {
    /// Position of the next entry this reader will observe
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Read up to `max_items` entries, waiting up to `max_wait` for data
    ///
    /// An empty batch means the wait elapsed with nothing new; callers use
    /// that as a keep-alive point, not an error. Cancel-safe: the cursor only
    /// advances when entries are returned.
    pub async fn read(&mut self, max_items: usize, max_wait: Duration) -> ReadBatch {
        let deadline = Instant::now() + max_wait;
        loop {
            let shared = Arc::clone(&self.log.shared);
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking state so an append between
            // the check and the await is not missed.
            notified.as_mut().enable();

            let batch = self.try_read(max_items);
            if !batch.is_empty() {
                return batch;
            }

            if timeout_at(deadline, notified).await.is_err() {
                return batch;
            }
        }
    }

    fn try_read(&mut self, max_items: usize) -> ReadBatch {
        let state = self.log.shared.state.lock().expect("log lock poisoned");
        let first = state.first_seq();

        let mut skipped = 0;
        if self.next < first {
            skipped = first - self.next;
            tracing::warn!(
                skipped,
                resume_at = first,
                "log reader lapped retention window, resuming at oldest entry"
            );
            self.next = first;
        }

        let start = (self.next - first) as usize;
        let entries: Vec<Envelope> = state
            .entries
            .iter()
            .skip(start)
            .take(max_items)
            .cloned()
            .collect();
        if let Some(last) = entries.last() {
            self.next = last.seq + 1;
            metrics::histogram!("tickflow_log_read_latency_seconds")
                .record(last.appended_at.elapsed().as_secs_f64());
        }

        ReadBatch { entries, skipped }
    }
}
