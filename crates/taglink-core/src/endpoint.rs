// ── Endpoint ──
//
// Owns one controller connection for its whole lifetime. A single
// connection task runs the state machine (connect, scan, tear down,
// back off, reconnect) so connect attempts and cycles never overlap.
// Consumers interact through the cloneable `Endpoint` handle from any
// thread: lookups, write requests, subscriptions, shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};
use taglink_api::{ClientEvent, ClientFactory, ProtocolClient, TagValue};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::error::CoreError;
use crate::group::TagGroup;
use crate::model::tag::TagRef;
use crate::model::{
    ChangeEvent, ConnectionState, CycleSnapshot, EndpointStats, EndpointStatus, TagChange,
    TagHandle,
};
use crate::notify::{Notifier, Subscription};
use crate::presentation::{ReadMessage, ReadMode};
use crate::registry::{RegistrationReport, TagDefinition, TagRegistry};
use crate::scan::{CycleContext, CycleGuard, CycleReport, CycleResult, Tick, run_cycle};
use crate::stream::ChangeStream;
use crate::writes::{Completion, WriteCoalescer, WriteOutcome, WriteTicket};

type CycleFuture = BoxFuture<'static, CycleResult>;

// ── Endpoint ─────────────────────────────────────────────────────────

/// Handle to one controller endpoint.
///
/// Cheaply cloneable via `Arc<EndpointInner>`. Construct with a tag
/// registry and a client factory, call [`connect()`](Self::connect) to
/// start the connection task, and [`shutdown()`](Self::shutdown) to stop
/// it. Endpoints share nothing with each other.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    config: EndpointConfig,
    factory: Arc<dyn ClientFactory>,
    registry: Arc<TagRegistry>,
    notifier: Arc<Notifier>,
    writes: Arc<WriteCoalescer>,
    state: watch::Sender<ConnectionState>,
    /// Serializes a state change with the status it publishes.
    transitions: ReentrantMutex<()>,
    stats: Mutex<EndpointStats>,
    /// Group used by the running scan loop.
    group: ArcSwapOption<TagGroup>,
    /// Cancelled when shutdown starts.
    cancel: CancellationToken,
    /// Cancelled once shutdown has finished.
    closed: CancellationToken,
    closing: AtomicBool,
    reconnect_now: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Create an endpoint. Does NOT connect -- call
    /// [`connect()`](Self::connect) to start the connection task.
    pub fn new(
        config: EndpointConfig,
        registry: TagRegistry,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(EndpointInner {
                config,
                factory,
                registry: Arc::new(registry),
                notifier: Arc::new(Notifier::new()),
                writes: Arc::new(WriteCoalescer::new()),
                state,
                transitions: ReentrantMutex::new(()),
                stats: Mutex::new(EndpointStats::default()),
                group: ArcSwapOption::empty(),
                cancel: CancellationToken::new(),
                closed: CancellationToken::new(),
                closing: AtomicBool::new(false),
                reconnect_now: Notify::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.inner.registry
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the connection task. Returns immediately; progress is
    /// reported through the status stream. Calling it again while the
    /// task runs is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.inner.config.validate()?;

        let mut worker = self.inner.worker.lock();
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress);
        }
        if worker.is_some() {
            return Ok(());
        }
        *worker = Some(tokio::spawn(connection_task(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Skip the remaining reconnect delay and retry now. No-op unless the
    /// endpoint is offline and waiting to reconnect.
    pub fn reconnect_now(&self) {
        if *self.inner.state.borrow() == ConnectionState::Offline {
            info!("manual reconnect requested");
            self.inner.reconnect_now.notify_waiters();
        }
    }

    /// Stop the endpoint and wait for the protocol client to be torn down.
    ///
    /// Idempotent: later and concurrent calls wait for the first one to
    /// finish. Queued writes fail with [`CoreError::ShutdownInProgress`]
    /// and every handler is released.
    ///
    /// A cycle in flight is abandoned rather than awaited, so shutdown
    /// never waits on a hung exchange. Writes it was flushing resolve with
    /// [`CoreError::Disconnected`] even though the controller may already
    /// have applied them.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            inner.closed.cancelled().await;
            return;
        }

        info!(address = %inner.config.address, "shutting down endpoint");
        inner.transition(ConnectionState::Closing);
        inner.cancel.cancel();

        let worker = inner.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }

        inner.writes.close(&CoreError::ShutdownInProgress);
        inner.registry.invalidate_all();
        inner.notifier.release_all();
        inner.closed.cancel();
        debug!("endpoint shut down");
    }

    // ── State ────────────────────────────────────────────────────────

    /// Current connection state.
    pub fn status(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch the connection state.
    pub fn state_stream(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Every published status, in order.
    pub fn status_events(&self) -> broadcast::Receiver<EndpointStatus> {
        self.inner.notifier.status_events()
    }

    pub fn stats(&self) -> EndpointStats {
        self.inner.stats.lock().clone()
    }

    /// Handlers currently registered across all subscription kinds.
    pub fn subscriber_count(&self) -> usize {
        self.inner.notifier.handler_count()
    }

    // ── Tags ─────────────────────────────────────────────────────────

    pub fn tag(&self, key: &str) -> Option<TagHandle> {
        self.inner.registry.lookup(key)
    }

    pub fn tags(&self) -> Vec<TagHandle> {
        self.inner.registry.all()
    }

    /// Every tag's current value; `None` while unknown (before the first
    /// read and after a disconnect).
    pub fn all_tag_values(&self) -> IndexMap<String, Option<TagValue>> {
        self.inner.registry.values()
    }

    /// Replace the tag set. A running scan loop picks the new set up
    /// before its next cycle.
    pub fn redefine_tags<I>(&self, definitions: I) -> RegistrationReport
    where
        I: IntoIterator<Item = TagDefinition>,
    {
        let report = self.inner.registry.replace_all(definitions);
        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "tags redefined"
        );
        report
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Queue a write for the next cycle. The returned ticket resolves once
    /// the batch carrying it has been flushed.
    ///
    /// Fails immediately with `UnknownTag`, `InvalidValue` or
    /// `ShutdownInProgress`; nothing is queued then.
    pub fn request_write<K>(
        &self,
        tag: &K,
        value: impl Into<TagValue>,
    ) -> Result<WriteTicket, CoreError>
    where
        K: TagRef + ?Sized,
    {
        let (ticket, completion) = WriteTicket::new();
        self.queue_write(tag.tag_key(), value.into(), completion)?;
        Ok(ticket)
    }

    /// Callback form of [`request_write`](Self::request_write). The
    /// callback runs on the connection task, before the change
    /// notifications of the cycle that flushed the write.
    pub fn request_write_with<K, F>(
        &self,
        tag: &K,
        value: impl Into<TagValue>,
        completion: F,
    ) -> Result<(), CoreError>
    where
        K: TagRef + ?Sized,
        F: FnOnce(WriteOutcome) + Send + 'static,
    {
        self.queue_write(
            tag.tag_key(),
            value.into(),
            Completion::Callback(Box::new(completion)),
        )
    }

    /// Writes queued and not yet flushed.
    pub fn pending_writes(&self) -> usize {
        self.inner.writes.pending_len()
    }

    fn queue_write(
        &self,
        key: &str,
        value: TagValue,
        completion: Completion,
    ) -> Result<(), CoreError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress);
        }
        let tag = self
            .inner
            .registry
            .lookup(key)
            .ok_or_else(|| CoreError::UnknownTag {
                key: key.to_owned(),
            })?;
        let value = tag.coerce_for_write(value)?;
        debug!(key, %value, "write queued");
        self.inner.writes.request(tag, value, completion)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_status<F>(&self, handler: F) -> Subscription
    where
        F: Fn(EndpointStatus) + Send + Sync + 'static,
    {
        self.inner
            .notifier
            .subscribe_status(Arc::new(move |status: &EndpointStatus| handler(*status)))
    }

    /// Called once per changed tag per cycle.
    pub fn subscribe_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TagChange) + Send + Sync + 'static,
    {
        self.inner
            .notifier
            .subscribe_change(Arc::new(move |change: &Arc<TagChange>| handler(change)))
    }

    /// Called once per cycle in which anything changed, after the
    /// per-tag handlers.
    pub fn subscribe_all_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CycleSnapshot) + Send + Sync + 'static,
    {
        self.inner
            .notifier
            .subscribe_all_changed(Arc::new(move |snapshot: &Arc<CycleSnapshot>| {
                handler(snapshot);
            }))
    }

    /// Changes of a single tag.
    pub fn subscribe_tag<K, F>(&self, tag: &K, handler: F) -> Result<Subscription, CoreError>
    where
        K: TagRef + ?Sized,
        F: Fn(&TagChange) + Send + Sync + 'static,
    {
        let key = tag.tag_key();
        if self.inner.registry.lookup(key).is_none() {
            return Err(CoreError::UnknownTag {
                key: key.to_owned(),
            });
        }
        Ok(self.inner.notifier.subscribe_tag(
            key.to_owned(),
            Arc::new(move |change: &Arc<TagChange>| handler(change)),
        ))
    }

    /// Subscribe the way a reading node does, receiving ready-made
    /// messages.
    pub fn subscribe_read<F>(&self, mode: ReadMode, handler: F) -> Result<Subscription, CoreError>
    where
        F: Fn(&ReadMessage) + Send + Sync + 'static,
    {
        match mode {
            ReadMode::Single(key) => self.subscribe_tag(key.as_str(), move |change| {
                handler(&ReadMessage::from_change(change));
            }),
            ReadMode::AllSplit => Ok(self.subscribe_change(move |change| {
                handler(&ReadMessage::from_change(change));
            })),
            ReadMode::All => Ok(self.subscribe_all_changed(move |snapshot| {
                handler(&ReadMessage::all(snapshot.values.clone()));
            })),
        }
    }

    /// Multicast receiver of every change event.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.notifier.changes()
    }

    pub fn change_stream(&self) -> ChangeStream {
        ChangeStream::new(self.inner.notifier.changes())
    }
}

// ── Inner helpers ────────────────────────────────────────────────────

impl EndpointInner {
    /// Move to `next` and publish its status. `Closing` is absorbing:
    /// afterwards only a final `offline` status can still go out.
    fn transition(&self, next: ConnectionState) {
        let _serial = self.transitions.lock();
        let previous = *self.state.borrow();

        if previous == ConnectionState::Closing {
            if next == ConnectionState::Offline {
                self.notifier.publish_status(EndpointStatus::Offline);
            }
            return;
        }

        self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "endpoint state changed");
        }
        if let Some(status) = next.status() {
            self.notifier.publish_status(status);
        }
    }

    /// Group for the next cycle, rebuilt when the registry changed.
    fn current_group(&self) -> Arc<TagGroup> {
        match self.group.load_full() {
            Some(group) if group.version() == self.registry.version() => group,
            _ => self.rebuild_group(),
        }
    }

    fn rebuild_group(&self) -> Arc<TagGroup> {
        let group = Arc::new(TagGroup::from_registry(&self.registry));
        debug!(tags = group.len(), version = group.version(), "tag group rebuilt");
        self.group.store(Some(Arc::clone(&group)));
        group
    }

    fn cycle_context(&self, client: &Arc<dyn ProtocolClient>) -> CycleContext {
        CycleContext {
            client: Arc::clone(client),
            group: self.current_group(),
            registry: Arc::clone(&self.registry),
            writes: Arc::clone(&self.writes),
            notifier: Arc::clone(&self.notifier),
            timeout: self.config.timeout,
        }
    }

    fn record_cycle(&self, report: &CycleReport) {
        let mut stats = self.stats.lock();
        stats.cycles_completed += 1;
        stats.writes_flushed += u64::try_from(report.written).unwrap_or(u64::MAX);
        stats.last_cycle_at = Some(Utc::now());
        stats.last_cycle_duration = Some(report.elapsed);
    }
}

// ── Connection task ──────────────────────────────────────────────────

/// Connect, scan until something fails, tear down, wait, repeat -- until
/// shutdown. Exactly one client exists at a time: the next one is only
/// created after the previous one has been disconnected and dropped.
async fn connection_task(inner: Arc<EndpointInner>) {
    let mut attempts: u64 = 0;

    loop {
        if inner.cancel.is_cancelled() {
            break;
        }
        if attempts > 0 {
            inner.stats.lock().reconnect_attempts += 1;
        }
        attempts += 1;

        let client = inner.factory.create();
        let failure = run_connection(&inner, &client).await;
        teardown(&inner, &client).await;
        drop(client);

        // Registered before going offline so a manual reconnect issued
        // in reaction to the offline status is not missed.
        let reconnect = inner.reconnect_now.notified();
        tokio::pin!(reconnect);

        inner.registry.invalidate_all();
        inner.transition(ConnectionState::Offline);

        let Some(err) = failure else {
            break;
        };
        if err.is_connection_failure() {
            warn!(
                error = %err,
                retry_in = ?inner.config.reconnect_delay,
                "controller connection lost"
            );
        } else {
            warn!(
                error = %err,
                retry_in = ?inner.config.reconnect_delay,
                "controller rejected the scan; reconnecting"
            );
        }

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = &mut reconnect => {}
            () = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }

    debug!("connection task stopped");
}

/// One connection attempt and, if it succeeds, the scan loop. Returns the
/// failure that ended it, or `None` on shutdown.
async fn run_connection(
    inner: &EndpointInner,
    client: &Arc<dyn ProtocolClient>,
) -> Option<CoreError> {
    let config = &inner.config;
    inner.transition(ConnectionState::Connecting);
    let mut events = client.events();
    info!(address = %config.address, slot = config.slot, "connecting to controller");

    let connect = tokio::time::timeout(
        config.timeout,
        client.connect(&config.address, config.slot),
    );
    let outcome = tokio::select! {
        biased;
        () = inner.cancel.cancelled() => return None,
        err = next_session_failure(&mut events) => Err(CoreError::connect_failed(&config.address, err)),
        result = connect => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => match CoreError::from(err) {
                refused @ CoreError::ConnectFailed { .. } => Err(refused),
                other => Err(CoreError::connect_failed(&config.address, other)),
            },
            Err(_) => Err(CoreError::Timeout {
                operation: "connect",
                timeout_ms: config.timeout_ms(),
            }),
        },
    };
    if let Err(err) = outcome {
        return Some(err);
    }

    inner.rebuild_group();
    inner.transition(ConnectionState::Online);
    scan_loop(inner, client, &mut events).await
}

/// Run cycles on the configured period until a failure or shutdown.
async fn scan_loop(
    inner: &EndpointInner,
    client: &Arc<dyn ProtocolClient>,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> Option<CoreError> {
    let mut guard = CycleGuard::new(inner.config.max_skipped_cycles);
    let mut ticker = tokio::time::interval(inner.config.cycle_time);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycle: Option<CycleFuture> = None;

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return None,
            err = next_session_failure(events) => return Some(err),
            result = in_flight(&mut cycle), if cycle.is_some() => {
                cycle = None;
                guard.finish();
                match result {
                    Ok(report) => inner.record_cycle(&report),
                    Err(err) => {
                        inner.stats.lock().cycles_failed += 1;
                        return Some(err);
                    }
                }
            }
            _ = ticker.tick() => match guard.on_tick() {
                Tick::Start => {
                    cycle = Some(Box::pin(run_cycle(inner.cycle_context(client))));
                }
                Tick::Skip { consecutive } => {
                    inner.stats.lock().cycles_skipped += 1;
                    debug!(consecutive, "previous cycle still in flight; tick skipped");
                }
                Tick::Stuck { consecutive } => {
                    {
                        let mut stats = inner.stats.lock();
                        stats.cycles_skipped += 1;
                        stats.cycles_failed += 1;
                    }
                    return Some(CoreError::CycleFailed {
                        reason: format!("cycle stuck: {consecutive} consecutive ticks skipped"),
                    });
                }
            },
        }
    }
}

async fn in_flight(cycle: &mut Option<CycleFuture>) -> CycleResult {
    match cycle {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Resolve with the first event that ends the session. A client whose
/// event channel closes simply stops reporting events.
async fn next_session_failure(events: &mut broadcast::Receiver<ClientEvent>) -> CoreError {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Error(message)) => return CoreError::RuntimeError { reason: message },
            Ok(ClientEvent::SessionEnded) => {
                return CoreError::RuntimeError {
                    reason: "session ended by controller".into(),
                };
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "client events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Best-effort disconnect, bounded by the endpoint timeout.
async fn teardown(inner: &EndpointInner, client: &Arc<dyn ProtocolClient>) {
    match tokio::time::timeout(inner.config.timeout, client.disconnect()).await {
        Ok(Ok(())) => debug!("controller session closed"),
        Ok(Err(err)) => debug!(error = %err, "disconnect failed; ignored"),
        Err(_) => debug!("disconnect timed out; ignored"),
    }
}
