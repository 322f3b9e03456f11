// ── Scan cycle ──
//
// One cycle: flush coalesced writes, read the whole tag group, publish
// what changed. The overlap guard keeps at most one cycle in flight and
// declares the connection stuck after too many consecutive skipped ticks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taglink_api::ProtocolClient;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::group::TagGroup;
use crate::model::CycleSnapshot;
use crate::notify::Notifier;
use crate::registry::TagRegistry;
use crate::writes::WriteCoalescer;

// ── Overlap guard ────────────────────────────────────────────────────

/// What a timer tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// No cycle in flight; start one.
    Start,
    /// The previous cycle is still running; skip this tick.
    Skip { consecutive: u32 },
    /// Too many consecutive skips: the connection is stuck.
    Stuck { consecutive: u32 },
}

/// Single-slot in-flight flag plus a bounded skip counter.
#[derive(Debug)]
pub(crate) struct CycleGuard {
    in_flight: bool,
    skipped: u32,
    max_skipped: u32,
}

impl CycleGuard {
    pub(crate) fn new(max_skipped: u32) -> Self {
        Self {
            in_flight: false,
            skipped: 0,
            max_skipped,
        }
    }

    pub(crate) fn on_tick(&mut self) -> Tick {
        if !self.in_flight {
            self.in_flight = true;
            self.skipped = 0;
            return Tick::Start;
        }
        self.skipped += 1;
        if self.skipped >= self.max_skipped {
            Tick::Stuck {
                consecutive: self.skipped,
            }
        } else {
            Tick::Skip {
                consecutive: self.skipped,
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        self.in_flight = false;
    }
}

// ── Cycle ────────────────────────────────────────────────────────────

/// Everything one cycle touches, cloned cheaply per cycle.
#[derive(Clone)]
pub(crate) struct CycleContext {
    pub(crate) client: Arc<dyn ProtocolClient>,
    pub(crate) group: Arc<TagGroup>,
    pub(crate) registry: Arc<TagRegistry>,
    pub(crate) writes: Arc<WriteCoalescer>,
    pub(crate) notifier: Arc<Notifier>,
    pub(crate) timeout: Duration,
}

/// Summary of a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub(crate) written: usize,
    pub(crate) changed: usize,
    pub(crate) elapsed: Duration,
}

/// Outcome of a cycle. A failed write still lets the read run; the cycle
/// then reports the write failure.
pub(crate) type CycleResult = Result<CycleReport, CoreError>;

pub(crate) async fn run_cycle(ctx: CycleContext) -> CycleResult {
    let started = Instant::now();
    let mut failure = None;
    let mut written = 0;

    if let Some(batch) = ctx.writes.take_batch() {
        let writes = batch.writes();
        debug!(tags = ?batch.keys(), "flushing writes");
        match bounded(ctx.timeout, "write", ctx.client.write_tag_group(&writes)).await {
            Ok(()) => {
                written = batch.len();
                batch.complete(&Ok(()));
            }
            Err(err) => {
                warn!(error = %err, count = batch.len(), "batched write failed");
                let reason = match &err {
                    CoreError::CycleFailed { reason } => reason.clone(),
                    other => other.to_string(),
                };
                let keys: Vec<String> = batch.keys().into_iter().map(str::to_owned).collect();
                // Every requester hears about the failure before the read.
                batch.complete(&Err(CoreError::WriteFailed {
                    key: keys.join(", "),
                    reason,
                }));
                failure = Some(err);
            }
        }
    }

    let values = bounded(
        ctx.timeout,
        "read",
        ctx.client.read_tag_group(ctx.group.addresses()),
    )
    .await?;
    let changes = ctx.group.apply_read(values)?;

    for change in &changes {
        ctx.notifier.publish_change(change);
    }
    if !changes.is_empty() {
        let snapshot = Arc::new(CycleSnapshot {
            changed: changes.clone(),
            values: ctx.registry.values(),
            at: Utc::now(),
        });
        ctx.notifier.publish_all_changed(&snapshot);
    }

    if let Some(err) = failure {
        return Err(err);
    }

    let report = CycleReport {
        written,
        changed: changes.len(),
        elapsed: started.elapsed(),
    };
    debug!(
        written = report.written,
        changed = report.changed,
        elapsed = ?report.elapsed,
        "cycle complete"
    );
    Ok(report)
}

/// Bound a protocol-client call by the endpoint timeout. Client errors
/// become their domain variant; an expired bound becomes `Timeout`.
async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, taglink_api::Error>>,
) -> Result<T, CoreError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::ChangeEvent;
    use crate::writes::WriteTicket;
    use pretty_assertions::assert_eq;
    use taglink_api::sim::SimulatedController;
    use taglink_api::{ClientFactory, TagValue};

    #[test]
    fn guard_skips_then_declares_stuck() {
        let mut guard = CycleGuard::new(3);
        assert_eq!(guard.on_tick(), Tick::Start);
        assert_eq!(guard.on_tick(), Tick::Skip { consecutive: 1 });
        assert_eq!(guard.on_tick(), Tick::Skip { consecutive: 2 });
        assert_eq!(guard.on_tick(), Tick::Stuck { consecutive: 3 });
    }

    #[test]
    fn finishing_resets_the_skip_count() {
        let mut guard = CycleGuard::new(3);
        assert_eq!(guard.on_tick(), Tick::Start);
        assert_eq!(guard.on_tick(), Tick::Skip { consecutive: 1 });
        guard.finish();
        assert_eq!(guard.on_tick(), Tick::Start);
        assert_eq!(guard.on_tick(), Tick::Skip { consecutive: 1 });
    }

    async fn context(plc: &SimulatedController) -> CycleContext {
        let registry = Arc::new(TagRegistry::new());
        registry.register(None, "A", None).unwrap();
        let client = plc.factory().create();
        client.connect("sim", 0).await.unwrap();
        CycleContext {
            client,
            group: Arc::new(TagGroup::from_registry(&registry)),
            registry,
            writes: Arc::new(WriteCoalescer::new()),
            notifier: Arc::new(Notifier::new()),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn first_read_publishes_tag_then_aggregate() {
        let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
        let ctx = context(&plc).await;
        let mut rx = ctx.notifier.changes();

        let report = run_cycle(ctx.clone()).await.unwrap();
        assert_eq!(report.changed, 1);
        match rx.try_recv().unwrap() {
            ChangeEvent::Tag(change) => {
                assert_eq!(change.value, TagValue::Dint(5));
                assert_eq!(change.previous, None);
            }
            other @ ChangeEvent::AllChanged(_) => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), ChangeEvent::AllChanged(_)));

        let report = run_cycle(ctx).await.unwrap();
        assert_eq!(report.changed, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_write_completes_then_reads_then_fails() {
        let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
        let ctx = context(&plc).await;
        let tag = ctx.registry.lookup("A").unwrap();
        let (ticket, completion) = WriteTicket::new();
        ctx.writes.request(tag.clone(), TagValue::Dint(9), completion).unwrap();

        plc.fail_next_writes(1);
        let err = run_cycle(ctx).await.unwrap_err();

        assert!(matches!(err, CoreError::CycleFailed { .. }));
        assert_eq!(
            ticket.await,
            Err(CoreError::WriteFailed {
                key: "A".into(),
                reason: "simulated write failure".into(),
            })
        );
        // The read still ran.
        assert_eq!(tag.value(), Some(TagValue::Dint(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_read_is_bounded_by_the_timeout() {
        let plc = SimulatedController::new().with_tag("A", TagValue::Dint(5));
        let ctx = context(&plc).await;
        plc.hang_reads(true);

        let err = run_cycle(ctx).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::Timeout {
                operation: "read",
                timeout_ms: 1000,
            }
        );
    }
}
