//! Output of a run: exported artifacts and the run report.

pub mod export;
pub mod summary;

pub use export::{ArtifactSink, ExportOutcome, ExportWriter, FsArtifactSink};
pub use summary::{generate_json_summary, generate_markdown_summary, RunSummary};
