//! In-memory simulated controller.
//!
//! Implements [`ProtocolClient`] against a shared tag table so endpoints
//! can be exercised without hardware. Supports fault injection (refused
//! connects, failed or hung exchanges, runtime errors, session loss) and
//! keeps the accounting tests need: connect attempts, live and peak
//! concurrent sessions, and a log of every write exchange.
//!
//! # Example
//!
//! ```rust,ignore
//! use taglink_api::sim::SimulatedController;
//! use taglink_api::TagValue;
//!
//! let plc = SimulatedController::new().with_tag("Main:Speed", TagValue::Real(12.5));
//! let factory = plc.factory();
//! // hand `factory` to an endpoint
//! plc.fail_next_reads(1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::client::{ClientEvent, ClientFactory, ProtocolClient};
use crate::error::Error;
use crate::types::{TagAddress, TagValue, TagWrite};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── Shared controller state ──────────────────────────────────────────

#[derive(Debug, Default)]
struct Faults {
    refuse_connects: u32,
    fail_reads: u32,
    fail_writes: u32,
    hang_reads: bool,
    hang_writes: bool,
}

struct SimState {
    tags: Mutex<HashMap<String, TagValue>>,
    faults: Mutex<Faults>,
    latency: Mutex<Duration>,
    events: broadcast::Sender<ClientEvent>,
    /// Bumped by `end_sessions`; sessions opened under an older
    /// generation fail every later exchange.
    generation: AtomicU64,
    connect_attempts: AtomicU64,
    read_exchanges: AtomicU64,
    live_sessions: AtomicUsize,
    peak_sessions: AtomicUsize,
    write_log: Mutex<Vec<Vec<TagWrite>>>,
}

/// A simulated controller shared by every client its factory creates.
///
/// Cheaply cloneable; clones observe and mutate the same tag table.
#[derive(Clone)]
pub struct SimulatedController {
    state: Arc<SimState>,
}

impl SimulatedController {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(SimState {
                tags: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                latency: Mutex::new(Duration::ZERO),
                events,
                generation: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
                read_exchanges: AtomicU64::new(0),
                live_sessions: AtomicUsize::new(0),
                peak_sessions: AtomicUsize::new(0),
                write_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Builder form of [`set_tag`](Self::set_tag).
    pub fn with_tag(self, key: &str, value: TagValue) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Factory handing out fresh sessions against this controller.
    pub fn factory(&self) -> SimulatedFactory {
        SimulatedFactory {
            controller: self.clone(),
        }
    }

    // ── Tag table ────────────────────────────────────────────────────

    /// Set a tag as if the control program had changed it.
    pub fn set_tag(&self, key: &str, value: TagValue) {
        self.state.tags.lock().insert(key.to_owned(), value);
    }

    pub fn tag(&self, key: &str) -> Option<TagValue> {
        self.state.tags.lock().get(key).cloned()
    }

    // ── Fault injection ──────────────────────────────────────────────

    pub fn refuse_next_connects(&self, count: u32) {
        self.state.faults.lock().refuse_connects = count;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.state.faults.lock().fail_reads = count;
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.state.faults.lock().fail_writes = count;
    }

    /// Make reads never answer until cleared.
    pub fn hang_reads(&self, hang: bool) {
        self.state.faults.lock().hang_reads = hang;
    }

    /// Make writes never answer until cleared.
    pub fn hang_writes(&self, hang: bool) {
        self.state.faults.lock().hang_writes = hang;
    }

    /// Delay applied to every connect, read and write.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Raise a runtime error on every live session.
    pub fn emit_error(&self, message: &str) {
        let _ = self
            .state
            .events
            .send(ClientEvent::Error(message.to_owned()));
    }

    /// End every open session; their later exchanges fail.
    pub fn end_sessions(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.state.events.send(ClientEvent::SessionEnded);
    }

    // ── Accounting ───────────────────────────────────────────────────

    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn read_exchanges(&self) -> u64 {
        self.state.read_exchanges.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.state.live_sessions.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open sessions ever observed.
    pub fn peak_sessions(&self) -> usize {
        self.state.peak_sessions.load(Ordering::SeqCst)
    }

    /// Every write exchange received, in order.
    pub fn write_log(&self) -> Vec<Vec<TagWrite>> {
        self.state.write_log.lock().clone()
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

// ── Factory ──────────────────────────────────────────────────────────

/// [`ClientFactory`] producing [`SimulatedClient`] sessions.
#[derive(Clone)]
pub struct SimulatedFactory {
    controller: SimulatedController,
}

impl ClientFactory for SimulatedFactory {
    fn create(&self) -> Arc<dyn ProtocolClient> {
        Arc::new(SimulatedClient {
            state: Arc::clone(&self.controller.state),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }
}

// ── Client session ───────────────────────────────────────────────────

/// One session against a [`SimulatedController`].
pub struct SimulatedClient {
    state: Arc<SimState>,
    connected: AtomicBool,
    generation: AtomicU64,
}

impl SimulatedClient {
    async fn delay(&self) {
        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_session(&self) -> Result<(), Error> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.generation.load(Ordering::SeqCst) != self.state.generation.load(Ordering::SeqCst)
        {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn release(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.live_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn connect(&self, address: &str, slot: u8) -> Result<(), Error> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        {
            let mut faults = self.state.faults.lock();
            if faults.refuse_connects > 0 {
                faults.refuse_connects -= 1;
                return Err(Error::ConnectionRefused {
                    address: address.to_owned(),
                    reason: "simulated refusal".into(),
                });
            }
        }

        if !self.connected.swap(true, Ordering::SeqCst) {
            let live = self.state.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.peak_sessions.fetch_max(live, Ordering::SeqCst);
        }
        self.generation.store(
            self.state.generation.load(Ordering::SeqCst),
            Ordering::SeqCst,
        );
        tracing::trace!(address, slot, "simulated session opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.release();
        Ok(())
    }

    async fn read_tag_group(&self, tags: &[TagAddress]) -> Result<Vec<TagValue>, Error> {
        self.ensure_session()?;
        self.state.read_exchanges.fetch_add(1, Ordering::SeqCst);

        let (hang, fail) = {
            let mut faults = self.state.faults.lock();
            let fail = faults.fail_reads > 0;
            if fail {
                faults.fail_reads -= 1;
            }
            (faults.hang_reads, fail)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.delay().await;
        if fail {
            return Err(Error::Protocol("simulated read failure".into()));
        }
        self.ensure_session()?;

        let table = self.state.tags.lock();
        tags.iter()
            .map(|address| {
                table
                    .get(&address.key())
                    .cloned()
                    .ok_or_else(|| Error::TagNotFound {
                        tag: address.symbolic_path(),
                    })
            })
            .collect()
    }

    async fn write_tag_group(&self, writes: &[TagWrite]) -> Result<(), Error> {
        self.ensure_session()?;

        let (hang, fail) = {
            let mut faults = self.state.faults.lock();
            let fail = faults.fail_writes > 0;
            if fail {
                faults.fail_writes -= 1;
            }
            (faults.hang_writes, fail)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.delay().await;
        if fail {
            return Err(Error::Protocol("simulated write failure".into()));
        }
        self.ensure_session()?;

        {
            let mut table = self.state.tags.lock();
            if let Some(missing) = writes.iter().find(|w| !table.contains_key(&w.address.key())) {
                return Err(Error::TagNotFound {
                    tag: missing.address.symbolic_path(),
                });
            }
            for write in writes {
                table.insert(write.address.key(), write.value.clone());
            }
        }
        self.state.write_log.lock().push(writes.to_vec());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.state.events.subscribe()
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────────
