//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.bizintel.toml` files. API keys are deliberately not part of the file;
//! they come from flags or the environment.

use crate::cli::Args;
use crate::sources::competitors::CompetitorsSettings;
use crate::sources::research::ResearchSettings;
use crate::sources::{DEFAULT_LOAN_LIMIT, DEFAULT_RADIUS_METERS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".bizintel.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Places provider (reviews and competitors).
    #[serde(default)]
    pub places: PlacesConfig,

    /// LLM research settings.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Loan data settings.
    #[serde(default)]
    pub loans: LoansConfig,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory that receives exported artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Location used when none is given on the command line.
    #[serde(default = "default_location")]
    pub location: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Time limit for each source, in seconds.
    #[serde(default = "default_source_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            location: default_location(),
            verbose: false,
            timeout_seconds: default_source_timeout(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_location() -> String {
    "Western Massachusetts".to_string()
}

fn default_source_timeout() -> u64 {
    120
}

/// Places provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesConfig {
    #[serde(default = "default_places_url")]
    pub base_url: String,

    #[serde(default = "default_geocode_url")]
    pub geocode_url: String,

    /// Competitor search radius in meters.
    #[serde(default = "default_radius")]
    pub radius_meters: u32,

    /// Result pages to fetch per competitor search.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Wait before requesting a follow-up page; the provider rejects page
    /// tokens that are used too soon.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            base_url: default_places_url(),
            geocode_url: default_geocode_url(),
            radius_meters: default_radius(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

fn default_places_url() -> String {
    "https://maps.googleapis.com/maps/api/place".to_string()
}

fn default_geocode_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

fn default_radius() -> u32 {
    DEFAULT_RADIUS_METERS
}

fn default_max_pages() -> u32 {
    2
}

fn default_page_delay_ms() -> u64 {
    2000
}

/// LLM research settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_research_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout of one completion request, in seconds. Long answers take far
    /// longer than the other providers' lookups.
    #[serde(default = "default_research_timeout")]
    pub timeout_seconds: u64,

    /// Extra context added to every research prompt.
    #[serde(default)]
    pub context: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_research_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_research_timeout(),
            context: None,
        }
    }
}

fn default_research_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_research_timeout() -> u64 {
    180
}

/// Loan data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoansConfig {
    #[serde(default = "default_loans_url")]
    pub base_url: String,

    /// State used when neither `--state` nor the location names one.
    #[serde(default = "default_state")]
    pub default_state: String,

    #[serde(default = "default_loan_limit")]
    pub limit: u32,
}

impl Default for LoansConfig {
    fn default() -> Self {
        Self {
            base_url: default_loans_url(),
            default_state: default_state(),
            limit: default_loan_limit(),
        }
    }
}

fn default_loans_url() -> String {
    "https://data.sba.gov/api/sba".to_string()
}

fn default_state() -> String {
    "MA".to_string()
}

fn default_loan_limit() -> u32 {
    DEFAULT_LOAN_LIMIT
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout of a single request, in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,

    /// Retries of transient failures (5xx, 429, connection errors).
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(timeout) = args.timeout {
            self.general.timeout_seconds = timeout;
        }
        if let Some(radius) = args.radius {
            self.places.radius_meters = radius;
        }
        if let Some(limit) = args.loan_limit {
            self.loans.limit = limit;
        }
        if args.context.is_some() {
            self.research.context = args.context.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level from the flags, raised to DEBUG by `general.verbose`
    /// unless `--quiet` was given.
    pub fn log_level(&self, args: &Args) -> tracing::Level {
        if self.general.verbose && !args.quiet {
            tracing::Level::DEBUG
        } else {
            args.log_level()
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.general.timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn research_timeout(&self) -> Duration {
        Duration::from_secs(self.research.timeout_seconds)
    }

    pub fn competitors_settings(&self) -> CompetitorsSettings {
        CompetitorsSettings {
            places_url: self.places.base_url.clone(),
            geocode_url: self.places.geocode_url.clone(),
            max_pages: self.places.max_pages.max(1),
            page_delay: Duration::from_millis(self.places.page_delay_ms),
        }
    }

    pub fn research_settings(&self) -> ResearchSettings {
        ResearchSettings {
            base_url: self.research.base_url.clone(),
            model: self.research.model.clone(),
            temperature: self.research.temperature,
            max_tokens: self.research.max_tokens,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
