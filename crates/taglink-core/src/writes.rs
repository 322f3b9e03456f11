// ── Write coalescer ──
//
// Pending writes accumulate between cycles, one entry per tag. A later
// request for the same tag replaces the value but keeps every earlier
// completion, so all requesters hear the outcome of the single write that
// carries the final value.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use indexmap::IndexMap;
use parking_lot::Mutex;
use taglink_api::{TagValue, TagWrite};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::CoreError;
use crate::model::TagHandle;

/// Outcome delivered to every write requester.
pub type WriteOutcome = Result<(), CoreError>;

/// How a requester is told the outcome.
pub(crate) enum Completion {
    Channel(oneshot::Sender<WriteOutcome>),
    Callback(Box<dyn FnOnce(WriteOutcome) + Send>),
}

impl Completion {
    fn complete(self, outcome: WriteOutcome) {
        match self {
            // The requester may have dropped its ticket; nothing to tell.
            Self::Channel(tx) => {
                let _ = tx.send(outcome);
            }
            Self::Callback(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
                    warn!("write completion callback panicked");
                }
            }
        }
    }
}

struct PendingWrite {
    tag: TagHandle,
    value: TagValue,
    completions: Vec<Completion>,
}

impl PendingWrite {
    fn complete(self, outcome: &WriteOutcome) {
        for completion in self.completions {
            completion.complete(outcome.clone());
        }
    }
}

// ── Coalescer ────────────────────────────────────────────────────────

pub(crate) struct WriteCoalescer {
    pending: Mutex<IndexMap<String, PendingWrite>>,
    closed: AtomicBool,
}

impl WriteCoalescer {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(IndexMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `value` for `tag`, replacing any unflushed value.
    pub(crate) fn request(
        &self,
        tag: TagHandle,
        value: TagValue,
        completion: Completion,
    ) -> Result<(), CoreError> {
        let mut pending = self.pending.lock();
        // Checked under the lock so `close` cannot miss a late request.
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress);
        }

        let entry = pending
            .entry(tag.key().to_owned())
            .or_insert_with(|| PendingWrite {
                tag: TagHandle::clone(&tag),
                value: value.clone(),
                completions: Vec::new(),
            });
        entry.tag = tag;
        entry.value = value;
        entry.completions.push(completion);
        Ok(())
    }

    /// Drain everything queued so far into one batch.
    pub(crate) fn take_batch(&self) -> Option<WriteBatch> {
        let drained = std::mem::take(&mut *self.pending.lock());
        if drained.is_empty() {
            None
        } else {
            Some(WriteBatch {
                entries: drained.into_values().collect(),
            })
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Refuse further requests and fail everything still queued.
    pub(crate) fn close(&self, error: &CoreError) {
        let drained = {
            let mut pending = self.pending.lock();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };
        let outcome = Err(error.clone());
        for (_, write) in drained {
            write.complete(&outcome);
        }
    }
}

// ── Batch ────────────────────────────────────────────────────────────

/// Writes drained for one flush.
///
/// Dropping a batch without completing it (the cycle carrying it was
/// abandoned because the connection dropped) fails every completion with
/// [`CoreError::Disconnected`], so no requester is left hanging.
pub(crate) struct WriteBatch {
    entries: Vec<PendingWrite>,
}

impl WriteBatch {
    pub(crate) fn writes(&self) -> Vec<TagWrite> {
        self.entries
            .iter()
            .map(|entry| TagWrite {
                address: entry.tag.address().clone(),
                value: entry.value.clone(),
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.tag.key()).collect()
    }

    pub(crate) fn complete(mut self, outcome: &WriteOutcome) {
        for entry in std::mem::take(&mut self.entries) {
            entry.complete(outcome);
        }
    }
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        let outcome = Err(CoreError::Disconnected);
        for entry in std::mem::take(&mut self.entries) {
            entry.complete(&outcome);
        }
    }
}

// ── WriteTicket ──────────────────────────────────────────────────────

/// Resolves once the write it was issued for has been flushed.
#[must_use = "a WriteTicket does nothing unless awaited"]
#[derive(Debug)]
pub struct WriteTicket {
    rx: oneshot::Receiver<WriteOutcome>,
}

impl WriteTicket {
    pub(crate) fn new() -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, Completion::Channel(tx))
    }
}

impl Future for WriteTicket {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CoreError::Disconnected)))
    }
}
