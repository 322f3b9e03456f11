// ── Status & change notifier ──
//
// Fans endpoint status transitions and tag changes out to two kinds of
// consumers: synchronous handlers (with an unsubscribe handle) and
// multicast channels for async consumers.

mod subscribers;

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{ChangeEvent, CycleSnapshot, EndpointStatus, TagChange};
pub use subscribers::Subscription;
use subscribers::{Handler, SubscriberList};

const STATUS_CHANNEL_SIZE: usize = 64;
const CHANGE_CHANNEL_SIZE: usize = 1024;

pub(crate) struct Notifier {
    /// Last published status. Held across dispatch so concurrent
    /// publishers cannot reorder handler calls.
    last_status: ReentrantMutex<Cell<Option<EndpointStatus>>>,
    status_handlers: Arc<SubscriberList<EndpointStatus>>,
    change_handlers: Arc<SubscriberList<Arc<TagChange>>>,
    all_changed_handlers: Arc<SubscriberList<Arc<CycleSnapshot>>>,
    status_tx: broadcast::Sender<EndpointStatus>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_SIZE);
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            last_status: ReentrantMutex::new(Cell::new(None)),
            status_handlers: SubscriberList::new(),
            change_handlers: SubscriberList::new(),
            all_changed_handlers: SubscriberList::new(),
            status_tx,
            change_tx,
        }
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Publish a status unless it repeats the last one. Returns whether
    /// anything was published.
    pub(crate) fn publish_status(&self, status: EndpointStatus) -> bool {
        let last = self.last_status.lock();
        if last.get() == Some(status) {
            return false;
        }
        last.set(Some(status));

        trace!(%status, "publishing status");
        let _ = self.status_tx.send(status);
        self.status_handlers.dispatch(&status);
        true
    }

    pub(crate) fn publish_change(&self, change: &Arc<TagChange>) {
        let _ = self.change_tx.send(ChangeEvent::Tag(Arc::clone(change)));
        self.change_handlers.dispatch(change);
    }

    pub(crate) fn publish_all_changed(&self, snapshot: &Arc<CycleSnapshot>) {
        let _ = self
            .change_tx
            .send(ChangeEvent::AllChanged(Arc::clone(snapshot)));
        self.all_changed_handlers.dispatch(snapshot);
    }

    // ── Subscribing ──────────────────────────────────────────────────

    pub(crate) fn subscribe_status(&self, handler: Handler<EndpointStatus>) -> Subscription {
        self.status_handlers.subscribe(handler)
    }

    pub(crate) fn subscribe_change(&self, handler: Handler<Arc<TagChange>>) -> Subscription {
        self.change_handlers.subscribe(handler)
    }

    /// Per-tag handler, filtered on `key`.
    pub(crate) fn subscribe_tag(
        &self,
        key: String,
        handler: Handler<Arc<TagChange>>,
    ) -> Subscription {
        self.change_handlers
            .subscribe(Arc::new(move |change: &Arc<TagChange>| {
                if change.key == key {
                    handler(change);
                }
            }))
    }

    pub(crate) fn subscribe_all_changed(
        &self,
        handler: Handler<Arc<CycleSnapshot>>,
    ) -> Subscription {
        self.all_changed_handlers.subscribe(handler)
    }

    pub(crate) fn status_events(&self) -> broadcast::Receiver<EndpointStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.status_handlers.len() + self.change_handlers.len() + self.all_changed_handlers.len()
    }

    /// Drop every handler; used by shutdown.
    pub(crate) fn release_all(&self) {
        self.status_handlers.clear();
        self.change_handlers.clear();
        self.all_changed_handlers.clear();
    }
}
