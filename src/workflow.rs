//! Caller-facing entry point: aggregate the selected sources, then export.

use crate::analysis::{AggregationState, Aggregator};
use crate::models::{AggregationBundle, BusinessDescriptor, SourceId, SourceResult};
use crate::report::{ExportOutcome, ExportWriter};
use crate::sources::SourceOptions;
use tracing::{info, warn};

/// Result of one end-to-end run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub bundle: AggregationBundle,
    pub export: ExportOutcome,
}

impl RunOutcome {
    /// Whether any selected source failed.
    pub fn has_failures(&self) -> bool {
        self.bundle.failures().next().is_some()
    }
}

#[allow(dead_code)] // The CLI always reports progress
pub async fn run(
    aggregator: &Aggregator,
    writer: &ExportWriter,
    descriptor: &BusinessDescriptor,
    sources: &[SourceId],
    options: &SourceOptions,
) -> RunOutcome {
    run_with_progress(aggregator, writer, descriptor, sources, options, |_, _, _| {}).await
}

/// [`run`] with a callback per resolved source.
pub async fn run_with_progress<F>(
    aggregator: &Aggregator,
    writer: &ExportWriter,
    descriptor: &BusinessDescriptor,
    sources: &[SourceId],
    options: &SourceOptions,
    on_resolved: F,
) -> RunOutcome
where
    F: FnMut(SourceId, &SourceResult, &AggregationState),
{
    let bundle = aggregator
        .run_all_with_progress(descriptor, sources, options, on_resolved)
        .await;

    if bundle.is_empty() {
        warn!("No sources were selected; only the manifest is written");
    }

    let export = writer.write(&bundle);
    info!(
        "Exported {} artifacts for {} sources ({} failures, {} write errors)",
        export.artifacts.len(),
        bundle.len(),
        export.failures.len(),
        export.write_errors.len()
    );

    RunOutcome { bundle, export }
}
