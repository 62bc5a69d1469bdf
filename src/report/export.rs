//! Persisting a bundle as spreadsheet-style artifacts.
//!
//! Every successful or degraded source becomes one artifact (a primary file
//! plus companion sheets). Failures are not written as artifacts; they go
//! into the run manifest with their reason. A write error on one source is
//! recorded and the remaining sources are still written.

use crate::error::ErrorKind;
use crate::models::{
    AggregationBundle, BusinessDescriptor, CompetitorStats, CompetitorsPayload, ExportArtifact,
    LoansPayload, ResearchReport, ReviewsPayload, SectionKind, SourceId, SourcePayload,
    SourceResult, SourceStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination for exported tables and documents.
pub trait ArtifactSink: Send + Sync {
    /// Write a table under `name` and return where it went.
    fn persist_table(&self, name: &str, headers: &[&str], rows: &[Vec<String>])
        -> Result<PathBuf>;

    /// Write a text document `<name>.<extension>`.
    fn persist_text(&self, name: &str, extension: &str, text: &str) -> Result<PathBuf>;
}

/// Writes CSV and text files into one directory, never overwriting.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn create(&self, file_name: &str) -> Result<(fs::File, PathBuf)> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create output directory: {}", self.dir.display())
        })?;

        let path = self.dir.join(file_name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok((file, path))
    }
}

impl ArtifactSink for FsArtifactSink {
    fn persist_table(
        &self,
        name: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<PathBuf> {
        let (file, path) = self.create(&format!("{}.csv", name))?;
        let mut writer = csv::Writer::from_writer(file);

        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(path)
    }

    fn persist_text(&self, name: &str, extension: &str, text: &str) -> Result<PathBuf> {
        let (mut file, path) = self.create(&format!("{}.{}", name, extension))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Wrote {}", path.display());
        Ok(path)
    }
}

/// What an export run produced.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub artifacts: Vec<ExportArtifact>,
    /// Sources that failed, with the reason.
    pub failures: Vec<(SourceId, String)>,
    /// Sources exported with known gaps, with the caveat.
    pub degraded: Vec<(SourceId, String)>,
    /// Sources whose artifact could not be written.
    pub write_errors: Vec<(SourceId, String)>,
    pub manifest: Option<PathBuf>,
}

impl ExportOutcome {
    pub fn artifact(&self, source: SourceId) -> Option<&ExportArtifact> {
        self.artifacts.iter().find(|a| a.source == source)
    }
}

/// Turns an [`AggregationBundle`] into artifacts on an [`ArtifactSink`].
#[derive(Clone)]
pub struct ExportWriter {
    sink: Arc<dyn ArtifactSink>,
}

impl ExportWriter {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self { sink }
    }

    /// Writer backed by an [`FsArtifactSink`] on `dir`.
    pub fn to_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FsArtifactSink::new(dir)))
    }

    pub fn write(&self, bundle: &AggregationBundle) -> ExportOutcome {
        let mut outcome = ExportOutcome::default();
        let prefix = run_prefix(bundle.descriptor().name(), bundle.created_at());

        for (source, result) in bundle.iter() {
            let payload = match result {
                SourceResult::Success(payload) => payload,
                SourceResult::Degraded { payload, reason } => {
                    outcome.degraded.push((source, reason.clone()));
                    payload
                }
                SourceResult::Failure(error) => {
                    outcome.failures.push((source, error.to_string()));
                    continue;
                }
            };

            let stem = format!("{}_{}", prefix, source.as_str());
            let mut written = Vec::new();
            let persisted = self.write_payload(&stem, bundle.descriptor(), payload, &mut written);

            // Files written before a failure stay listed next to the write error.
            let mut files = written.into_iter();
            if let Some(path) = files.next() {
                if persisted.is_ok() {
                    info!("Exported {} to {}", source, path.display());
                }
                outcome
                    .artifacts
                    .push(artifact(source, &stem, path, files.collect()));
            }
            if let Err(e) = persisted {
                warn!("Failed to export {}: {:#}", source, e);
                outcome.write_errors.push((source, format!("{:#}", e)));
            }
        }

        match self.write_manifest(&prefix, bundle, &outcome) {
            Ok(path) => outcome.manifest = Some(path),
            Err(e) => warn!("Failed to write manifest: {:#}", e),
        }

        outcome
    }

    fn write_payload(
        &self,
        stem: &str,
        descriptor: &BusinessDescriptor,
        payload: &SourcePayload,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        match payload {
            SourcePayload::Reviews(reviews) => {
                self.write_reviews(stem, descriptor, reviews, written)
            }
            SourcePayload::Competitors(competitors) => {
                self.write_competitors(stem, competitors, written)
            }
            SourcePayload::Research(report) => {
                self.write_research(stem, descriptor, report, written)
            }
            SourcePayload::Loans(loans) => self.write_loans(stem, loans, written),
        }
    }

    fn write_reviews(
        &self,
        stem: &str,
        descriptor: &BusinessDescriptor,
        payload: &ReviewsPayload,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let rows: Vec<Vec<String>> = payload
            .reviews
            .iter()
            .map(|r| {
                vec![
                    r.business_name.clone(),
                    r.author.clone(),
                    opt(r.rating),
                    r.text.clone(),
                    r.time.map(format_unix).unwrap_or_default(),
                    r.relative_time.clone(),
                ]
            })
            .collect();
        written.push(self.sink.persist_table(
            stem,
            &["business_name", "author", "rating", "text", "time", "relative_time"],
            &rows,
        )?);

        if let Some(ref place) = payload.place {
            let summary = vec![
                metric("Business", descriptor.name()),
                metric("Address", &place.address),
                metric("Overall Rating", &opt(place.overall_rating)),
                metric("Total Ratings", &place.total_ratings.to_string()),
                metric("Website", &place.website),
                metric("Phone", &place.phone),
                metric("Reviews Retrieved", &payload.reviews.len().to_string()),
            ];
            written.push(self.sink.persist_table(
                &format!("{}_summary", stem),
                &["metric", "value"],
                &summary,
            )?);
        }

        Ok(())
    }

    fn write_competitors(
        &self,
        stem: &str,
        payload: &CompetitorsPayload,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let rows: Vec<Vec<String>> = payload
            .competitors
            .iter()
            .map(|c| {
                vec![
                    c.name.clone(),
                    c.address.clone(),
                    opt(c.rating),
                    c.user_ratings_total.to_string(),
                    c.place_id.clone(),
                    c.types.clone(),
                    opt(c.price_level),
                    c.business_status.clone(),
                ]
            })
            .collect();
        written.push(self.sink.persist_table(
            stem,
            &[
                "name",
                "address",
                "rating",
                "user_ratings_total",
                "place_id",
                "types",
                "price_level",
                "business_status",
            ],
            &rows,
        )?);

        let stats = CompetitorStats::from_competitors(&payload.competitors);
        let summary = vec![
            metric("Total Competitors", &stats.total.to_string()),
            metric("Search Radius (m)", &payload.radius_meters.to_string()),
            metric("Average Rating", &opt(stats.average_rating.map(round2))),
            metric("Median Rating", &opt(stats.median_rating.map(round2))),
            metric("Total Reviews", &stats.total_reviews.to_string()),
            metric(
                "Average Reviews per Business",
                &round2(stats.average_reviews).to_string(),
            ),
        ];
        written.push(self.sink.persist_table(
            &format!("{}_summary", stem),
            &["metric", "value"],
            &summary,
        )?);

        Ok(())
    }

    fn write_research(
        &self,
        stem: &str,
        descriptor: &BusinessDescriptor,
        report: &ResearchReport,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        written.push(
            self.sink
                .persist_text(stem, "md", &research_markdown(descriptor, report))?,
        );

        let rows: Vec<Vec<String>> = report
            .sections
            .iter()
            .map(|s| vec![s.kind.title().to_string(), s.body.clone()])
            .collect();
        written.push(self.sink.persist_table(
            &format!("{}_sections", stem),
            &["section", "content"],
            &rows,
        )?);

        Ok(())
    }

    fn write_loans(
        &self,
        stem: &str,
        payload: &LoansPayload,
        written: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let rates: Vec<Vec<String>> = payload
            .programs
            .iter()
            .map(|p| {
                vec![
                    p.program.clone(),
                    p.max_loan_amount.clone(),
                    p.rate_type.clone(),
                    p.base_rate.clone(),
                    p.typical_spread.clone(),
                    p.guarantee.clone(),
                    p.use_case.clone(),
                    p.last_updated.format("%Y-%m-%d").to_string(),
                ]
            })
            .collect();
        written.push(self.sink.persist_table(
            &format!("{}_rates", stem),
            &[
                "program",
                "max_loan_amount",
                "rate_type",
                "base_rate",
                "typical_spread",
                "guarantee",
                "use_case",
                "last_updated",
            ],
            &rates,
        )?);

        if !payload.state.is_empty() {
            let loans: Vec<Vec<String>> = payload
                .loans
                .iter()
                .map(|l| {
                    vec![
                        l.loan_number.clone(),
                        l.borrower_name.clone(),
                        l.borrower_state.clone(),
                        l.approval_date.clone(),
                        opt(l.loan_amount),
                        l.program.clone(),
                        opt(l.term_months),
                        opt(l.jobs_supported),
                        l.business_type.clone(),
                    ]
                })
                .collect();
            written.push(self.sink.persist_table(
                &format!("{}_loans_{}", stem, payload.state),
                &[
                    "loan_number",
                    "borrower_name",
                    "borrower_state",
                    "approval_date",
                    "loan_amount",
                    "program",
                    "term_months",
                    "jobs_supported",
                    "business_type",
                ],
                &loans,
            )?);
        }

        if let Some(ref eligibility) = payload.eligibility {
            let rows: Vec<Vec<String>> = eligibility
                .recommended_programs
                .iter()
                .map(|p| {
                    vec![
                        p.program.clone(),
                        p.eligible.clone(),
                        p.max_amount.clone(),
                        p.notes.clone(),
                    ]
                })
                .collect();
            written.push(self.sink.persist_table(
                &format!("{}_eligibility", stem),
                &["program", "eligible", "max_amount", "notes"],
                &rows,
            )?);
        }

        Ok(())
    }

    fn write_manifest(
        &self,
        prefix: &str,
        bundle: &AggregationBundle,
        outcome: &ExportOutcome,
    ) -> Result<PathBuf> {
        let sources = SourceId::ALL
            .iter()
            .map(|&source| {
                let result = bundle.get(source);
                let artifact = outcome.artifact(source);
                ManifestEntry {
                    source,
                    status: bundle.status(source),
                    records: result.and_then(|r| r.payload()).map(|p| p.record_count()),
                    artifacts: artifact
                        .map(|a| {
                            std::iter::once(a.path.clone())
                                .chain(a.companions.iter().cloned())
                                .collect()
                        })
                        .unwrap_or_default(),
                    error_kind: result.and_then(|r| r.error()).map(|e| e.kind()),
                    reason: match result {
                        Some(SourceResult::Failure(e)) => Some(e.to_string()),
                        Some(SourceResult::Degraded { reason, .. }) => Some(reason.clone()),
                        _ => None,
                    },
                    write_error: outcome
                        .write_errors
                        .iter()
                        .find(|(s, _)| *s == source)
                        .map(|(_, e)| e.clone()),
                }
            })
            .collect();

        let manifest = Manifest {
            business: bundle.descriptor(),
            created_at: bundle.created_at(),
            sources,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        self.sink
            .persist_text(&format!("{}_manifest", prefix), "json", &json)
    }
}

#[derive(Serialize)]
struct Manifest<'a> {
    business: &'a BusinessDescriptor,
    created_at: DateTime<Utc>,
    sources: Vec<ManifestEntry>,
}

#[derive(Serialize)]
struct ManifestEntry {
    source: SourceId,
    status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<usize>,
    artifacts: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    write_error: Option<String>,
}

/// Markdown document of a research report.
pub fn research_markdown(descriptor: &BusinessDescriptor, report: &ResearchReport) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# Business Analysis: {}\n\n", descriptor.name()));
    if let Some(business_type) = descriptor.business_type() {
        doc.push_str(&format!("- **Industry:** {}\n", business_type));
    }
    doc.push_str(&format!("- **Location:** {}\n", descriptor.location()));
    if !report.model.is_empty() {
        doc.push_str(&format!("- **Model:** `{}`\n", report.model));
    }
    doc.push_str(&format!("- **Tokens Used:** {}\n\n", report.tokens_used));

    if report.sections.is_empty() {
        doc.push_str("_No analysis was returned._\n");
    }
    for section in &report.sections {
        if section.kind != SectionKind::General {
            doc.push_str(&format!("## {}\n\n", section.kind.title()));
        }
        doc.push_str(section.body.trim());
        doc.push_str("\n\n");
    }

    doc
}

/// `<sanitized name>_<YYYYmmdd_HHMMSS>`, shared by every file of a run.
pub fn run_prefix(name: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", sanitize_name(name), at.format("%Y%m%d_%H%M%S"))
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "business".to_string()
    } else {
        sanitized
    }
}

fn artifact(source: SourceId, stem: &str, path: PathBuf, companions: Vec<PathBuf>) -> ExportArtifact {
    ExportArtifact {
        source,
        name: stem.to_string(),
        path,
        companions,
    }
}

fn metric(name: &str, value: &str) -> Vec<String> {
    vec![name.to_string(), value.to_string()]
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn format_unix(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}
