use std::fmt::Write as _;

use serde::Serialize;
use taglink_core::{EndpointConfig, RegistrationReport, TagRegistry};

use crate::cli::{CheckArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    config: String,
    endpoint: &'a EndpointConfig,
    tags: &'a [String],
    skipped: Vec<SkippedRow>,
}

#[derive(Debug, Serialize)]
struct SkippedRow {
    tag: String,
    error: String,
}

pub fn handle(args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (path, config) = super::load(args.config.as_deref())?;
    let endpoint = config.endpoint_config()?;
    let (_, report) = TagRegistry::from_table(config.tag_definitions());

    let skipped = skipped_rows(&report);
    let rendered = match global.output {
        OutputFormat::Json => output::render_json_pretty(&CheckReport {
            config: path.display().to_string(),
            endpoint: &endpoint,
            tags: &report.registered,
            skipped,
        })?,
        OutputFormat::Text => render_text(&endpoint, &report),
    };
    output::print_output(&rendered, global.quiet)?;

    if report.is_clean() {
        return Ok(());
    }
    let details = skipped_rows(&report)
        .into_iter()
        .map(|row| format!("{}: {}", row.tag, row.error))
        .collect::<Vec<_>>()
        .join("\n");
    Err(CliError::InvalidTags {
        count: report.skipped.len(),
        details,
    })
}

fn skipped_rows(report: &RegistrationReport) -> Vec<SkippedRow> {
    report
        .skipped
        .iter()
        .map(|skipped| {
            let def = &skipped.definition;
            SkippedRow {
                tag: def
                    .program
                    .as_deref()
                    .map_or_else(|| def.name.clone(), |p| format!("{p}:{}", def.name)),
                error: skipped.error.to_string(),
            }
        })
        .collect()
}

fn render_text(endpoint: &EndpointConfig, report: &RegistrationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "endpoint   {} (slot {})", endpoint.address, endpoint.slot);
    let _ = writeln!(
        out,
        "cycle      {}",
        humantime::format_duration(endpoint.cycle_time)
    );
    let _ = writeln!(
        out,
        "reconnect  {}",
        humantime::format_duration(endpoint.reconnect_delay)
    );
    let _ = writeln!(
        out,
        "timeout    {}",
        humantime::format_duration(endpoint.timeout)
    );
    let _ = writeln!(out, "tags       {}", report.registered.len());
    for key in &report.registered {
        let _ = writeln!(out, "  {key}");
    }
    if !report.skipped.is_empty() {
        let _ = writeln!(out, "skipped    {}", report.skipped.len());
        for row in skipped_rows(report) {
            let _ = writeln!(out, "  {}  ({})", row.tag, row.error);
        }
    }
    out.trim_end().to_owned()
}
