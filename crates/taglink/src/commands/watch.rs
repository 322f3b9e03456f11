use std::sync::Arc;

use serde::Serialize;
use taglink_api::sim::SimulatedController;
use taglink_core::{
    ChangeEvent, DataType, Endpoint, EndpointStatus, StatusDisplay, TagRegistry, TagValue,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One line of watch output.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StatusLine {
    Status {
        status: EndpointStatus,
        display: StatusDisplay,
    },
}

pub async fn handle(args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (_, config) = super::load(args.config.as_deref())?;
    let endpoint_config = config.endpoint_config()?;
    if !args.simulate {
        return Err(CliError::NoDriver {
            address: endpoint_config.address,
        });
    }

    let (registry, report) = TagRegistry::from_table(config.tag_definitions());
    if !report.is_clean() {
        warn!(skipped = report.skipped.len(), "watching without invalid tags");
    }

    let controller = seeded_controller(&registry);
    let endpoint = Endpoint::new(endpoint_config, registry, Arc::new(controller.factory()));
    let mut status = endpoint.status_events();
    let mut changes = endpoint.changes();
    endpoint.connect()?;

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let result = loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
            () = &mut deadline => break Ok(()),
            received = status.recv() => match received {
                Ok(status) => {
                    let line = StatusLine::Status {
                        status,
                        display: StatusDisplay::for_status(status, None),
                    };
                    if let Err(err) = emit(&line, global) {
                        break Err(err);
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "status events dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
            received = changes.recv() => match received {
                Ok(event @ ChangeEvent::Tag(_)) => {
                    if let Err(err) = emit(&event, global) {
                        break Err(err);
                    }
                }
                Ok(event @ ChangeEvent::AllChanged(_)) => {
                    if args.aggregate {
                        if let Err(err) = emit(&event, global) {
                            break Err(err);
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "change events dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    endpoint.shutdown().await;
    let stats = endpoint.stats();
    info!(
        cycles = stats.cycles_completed,
        failed = stats.cycles_failed,
        reconnects = stats.reconnect_attempts,
        "endpoint stopped"
    );
    result
}

fn emit<T: Serialize>(line: &T, global: &GlobalOpts) -> Result<(), CliError> {
    output::print_output(&output::render_json_line(line)?, global.quiet)
}

/// In-memory controller holding a zero value for every registered tag.
/// Tags without a declared type are simulated as DINT.
fn seeded_controller(registry: &TagRegistry) -> SimulatedController {
    let controller = SimulatedController::new();
    for tag in registry.all() {
        let data_type = tag.declared_type().unwrap_or(DataType::Dint);
        controller.set_tag(tag.key(), TagValue::zero(data_type));
    }
    controller
}
