//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{EligibilityProfile, SourceId};
use crate::sources::loans::normalize_state;
use crate::sources::Credentials;
use clap::Parser;
use std::path::PathBuf;

/// bizintel - business intelligence for acquisition research
///
/// Collects customer reviews, nearby competitors, LLM market research and
/// SBA loan data for one business, and exports each source as CSV/Markdown
/// files plus a run manifest.
///
/// Examples:
///   bizintel --name "Big Y World Class Market" --business-type "Grocery Store" --location "Springfield, MA"
///   bizintel -n "Big Y" -s reviews,competitors --radius 10000
///   bizintel -n "Big Y" -s loans --annual-revenue 2000000 --employees 25 --years-in-business 5 --credit-score 720
///   bizintel -n "Big Y" --dry-run
///   bizintel --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Name of the business to research
    #[arg(short, long, value_name = "NAME", required_unless_present = "init_config")]
    pub name: Option<String>,

    /// Business type or industry (e.g. "Grocery Store")
    ///
    /// Used as the competitor search keyword; the name is used when absent.
    #[arg(short = 't', long, value_name = "TYPE")]
    pub business_type: Option<String>,

    /// Location of the business
    ///
    /// Defaults to the configured location ("Western Massachusetts").
    #[arg(short, long, value_name = "LOCATION")]
    pub location: Option<String>,

    /// Extra context for the research prompt
    #[arg(long, value_name = "TEXT")]
    pub context: Option<String>,

    /// Sources to query (comma-separated)
    ///
    /// Values: reviews, competitors, research, loans. Default: all.
    #[arg(short, long, value_name = "SOURCES", value_delimiter = ',')]
    pub sources: Option<Vec<SourceId>>,

    /// Competitor search radius in meters
    #[arg(long, value_name = "METERS")]
    pub radius: Option<u32>,

    /// Two-letter state code for loan data
    ///
    /// Derived from the location when not given.
    #[arg(long, value_name = "STATE")]
    pub state: Option<String>,

    /// Maximum number of loan records
    #[arg(long, value_name = "COUNT")]
    pub loan_limit: Option<u32>,

    /// Annual revenue in dollars, for the loan eligibility screen
    #[arg(long, value_name = "DOLLARS", requires_all = ["employees", "years_in_business", "credit_score"])]
    pub annual_revenue: Option<f64>,

    /// Number of employees, for the loan eligibility screen
    #[arg(long, value_name = "COUNT", requires = "annual_revenue")]
    pub employees: Option<u32>,

    /// Years in business, for the loan eligibility screen
    #[arg(long, value_name = "YEARS", requires = "annual_revenue")]
    pub years_in_business: Option<u32>,

    /// Owner credit score, for the loan eligibility screen
    #[arg(long, value_name = "SCORE", requires = "annual_revenue")]
    pub credit_score: Option<u32>,

    /// Time limit per source in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory for exported files
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Format of the run report (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub report_format: ReportFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .bizintel.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Places API key (reviews and competitors)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub google_api_key: Option<String>,

    /// OpenAI API key (research)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub openai_api_key: Option<String>,

    /// SBA data API key (optional)
    #[arg(long, env = "SBA_API_KEY", hide_env_values = true, value_name = "KEY")]
    pub sba_api_key: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: show which sources would run without calling any provider
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when any selected source failed
    ///
    /// Useful in scripts that must not accept partial results.
    #[arg(long)]
    pub strict: bool,

    /// Generate a default .bizintel.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Format of the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err("Business name must not be empty".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        // The places provider caps nearby search at 50 km.
        if let Some(radius) = self.radius {
            if !(1..=50_000).contains(&radius) {
                return Err("Radius must be between 1 and 50000 meters".to_string());
            }
        }

        if self.loan_limit == Some(0) {
            return Err("Loan limit must be at least 1".to_string());
        }

        if let Some(ref state) = self.state {
            if normalize_state(state).is_none() {
                return Err(format!("Unknown US state: {}", state));
            }
        }

        if let Some(score) = self.credit_score {
            if !(300..=850).contains(&score) {
                return Err("Credit score must be between 300 and 850".to_string());
            }
        }

        if let Some(revenue) = self.annual_revenue {
            if !revenue.is_finite() || revenue < 0.0 {
                return Err("Annual revenue must be a non-negative amount".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Selected sources, all of them when none were given.
    pub fn selected_sources(&self) -> Vec<SourceId> {
        self.sources
            .clone()
            .unwrap_or_else(|| SourceId::ALL.to_vec())
    }

    /// Eligibility profile, when all four figures were given.
    pub fn eligibility(&self) -> Option<EligibilityProfile> {
        Some(EligibilityProfile {
            annual_revenue: self.annual_revenue?,
            employees: self.employees?,
            years_in_business: self.years_in_business?,
            credit_score: self.credit_score?,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            google_api_key: self.google_api_key.clone(),
            openai_api_key: self.openai_api_key.clone(),
            sba_api_key: self.sba_api_key.clone(),
        }
    }
}
