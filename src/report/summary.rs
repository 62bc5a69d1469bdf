//! Run report generation.
//!
//! Renders one aggregation run (bundle plus export outcome) as a Markdown
//! document or JSON for people reading the output directory.

use super::export::ExportOutcome;
use crate::models::{AggregationBundle, SourceId, SourceStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Everything the run report shows.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub business_name: String,
    pub business_type: Option<String>,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sources: Vec<SourceLine>,
    pub manifest: Option<PathBuf>,
}

/// One row of the per-source table.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLine {
    pub source: SourceId,
    pub status: SourceStatus,
    pub records: Option<usize>,
    pub files: Vec<PathBuf>,
    /// Failure reason, degradation caveat or write error.
    pub note: Option<String>,
}

impl RunSummary {
    pub fn new(bundle: &AggregationBundle, export: &ExportOutcome, duration_seconds: f64) -> Self {
        let descriptor = bundle.descriptor();

        let sources = SourceId::ALL
            .iter()
            .map(|&source| {
                let result = bundle.get(source);
                let files = export
                    .artifact(source)
                    .map(|a| {
                        std::iter::once(a.path.clone())
                            .chain(a.companions.iter().cloned())
                            .collect()
                    })
                    .unwrap_or_default();

                let note = export
                    .write_errors
                    .iter()
                    .chain(&export.failures)
                    .chain(&export.degraded)
                    .find(|(s, _)| *s == source)
                    .map(|(_, reason)| reason.clone());

                SourceLine {
                    source,
                    status: bundle.status(source),
                    records: result.and_then(|r| r.payload()).map(|p| p.record_count()),
                    files,
                    note,
                }
            })
            .collect();

        Self {
            business_name: descriptor.name().to_string(),
            business_type: descriptor.business_type().map(String::from),
            location: descriptor.location().to_string(),
            created_at: bundle.created_at(),
            duration_seconds,
            sources,
            manifest: export.manifest.clone(),
        }
    }

    pub fn count(&self, status: SourceStatus) -> usize {
        self.sources.iter().filter(|s| s.status == status).count()
    }
}

/// Generate the Markdown run report.
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# Business Intelligence Report\n\n");
    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_sources_section(summary));
    output.push_str(&generate_issues_section(summary));
    output.push_str(&generate_files_section(summary));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Business:** {}\n", summary.business_name));
    if let Some(ref business_type) = summary.business_type {
        section.push_str(&format!("- **Type:** {}\n", business_type));
    }
    section.push_str(&format!("- **Location:** {}\n", summary.location));
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        summary.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        summary.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_sources_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Sources\n\n");
    section.push_str(&format!(
        "| {} Success | {} Degraded | {} Failed | {} Skipped |\n",
        SourceStatus::Success.emoji(),
        SourceStatus::Degraded.emoji(),
        SourceStatus::Failed.emoji(),
        SourceStatus::Skipped.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} |\n\n",
        summary.count(SourceStatus::Success),
        summary.count(SourceStatus::Degraded),
        summary.count(SourceStatus::Failed),
        summary.count(SourceStatus::Skipped),
    ));

    section.push_str("| Source | Status | Records |\n");
    section.push_str("|:---|:---|:---:|\n");
    for line in &summary.sources {
        section.push_str(&format!(
            "| {} | {} {} | {} |\n",
            line.source.label(),
            line.status.emoji(),
            line.status,
            line.records.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
        ));
    }
    section.push('\n');

    section
}

/// Failures and caveats, if any.
fn generate_issues_section(summary: &RunSummary) -> String {
    let noted: Vec<&SourceLine> = summary.sources.iter().filter(|s| s.note.is_some()).collect();
    if noted.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Issues\n\n");
    for line in noted {
        section.push_str(&format!(
            "- **{}** ({}): {}\n",
            line.source.label(),
            line.status,
            line.note.as_deref().unwrap_or_default()
        ));
    }
    section.push('\n');

    section
}

fn generate_files_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Files\n\n");

    let mut any = false;
    for line in &summary.sources {
        for file in &line.files {
            section.push_str(&format!("- `{}`\n", file.display()));
            any = true;
        }
    }
    if let Some(ref manifest) = summary.manifest {
        section.push_str(&format!("- `{}` (manifest)\n", manifest.display()));
        any = true;
    }
    if !any {
        section.push_str("No files were written.\n");
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by bizintel {}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate the JSON run report.
pub fn generate_json_summary(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::{BusinessDescriptor, ExportArtifact, SourcePayload, SourceResult};

    fn create_test_summary() -> RunSummary {
        let descriptor = BusinessDescriptor::new(
            "Big Y World Class Market",
            Some("Grocery Store".to_string()),
            "Springfield, MA",
            None,
        )
        .unwrap();
        let mut bundle = AggregationBundle::new(descriptor, Utc::now());
        bundle.insert(
            SourceId::Reviews,
            SourceResult::Success(SourcePayload::empty_for(SourceId::Reviews)),
        );
        bundle.insert(
            SourceId::Loans,
            SourceResult::Failure(SourceError::transport("cannot connect")),
        );

        let export = ExportOutcome {
            artifacts: vec![ExportArtifact {
                source: SourceId::Reviews,
                name: "Big_Y_reviews".to_string(),
                path: PathBuf::from("output/Big_Y_reviews.csv"),
                companions: Vec::new(),
            }],
            failures: vec![(SourceId::Loans, "upstream error: cannot connect".to_string())],
            manifest: Some(PathBuf::from("output/Big_Y_manifest.json")),
            ..ExportOutcome::default()
        };

        RunSummary::new(&bundle, &export, 3.2)
    }

    #[test]
    fn test_summary_lines() {
        let summary = create_test_summary();

        assert_eq!(summary.sources.len(), 4);
        assert_eq!(summary.count(SourceStatus::Success), 1);
        assert_eq!(summary.count(SourceStatus::Failed), 1);
        assert_eq!(summary.count(SourceStatus::Skipped), 2);

        let loans = &summary.sources[3];
        assert_eq!(loans.source, SourceId::Loans);
        assert_eq!(loans.note.as_deref(), Some("upstream error: cannot connect"));
        assert_eq!(summary.sources[0].records, Some(0));
    }

    #[test]
    fn test_generate_markdown_summary() {
        let markdown = generate_markdown_summary(&create_test_summary());

        assert!(markdown.contains("# Business Intelligence Report"));
        assert!(markdown.contains("- **Business:** Big Y World Class Market"));
        assert!(markdown.contains("## Issues"));
        assert!(markdown.contains("cannot connect"));
        assert!(markdown.contains("`output/Big_Y_reviews.csv`"));
        assert!(markdown.contains("(manifest)"));
    }

    #[test]
    fn test_no_issues_section_when_clean() {
        let mut summary = create_test_summary();
        for line in &mut summary.sources {
            line.note = None;
        }
        assert!(generate_issues_section(&summary).is_empty());
    }

    #[test]
    fn test_generate_json_summary() {
        let json = generate_json_summary(&create_test_summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["business_name"], "Big Y World Class Market");
        assert_eq!(value["sources"][3]["status"], "failed");
    }
}
