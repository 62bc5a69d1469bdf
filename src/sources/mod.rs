//! Source adapters.
//!
//! Each adapter wraps one external provider behind [`SourceAdapter`]:
//! it turns a [`BusinessDescriptor`] into a provider query and normalizes
//! the response into the fixed record types in [`crate::models`].

pub mod competitors;
pub mod http;
pub mod loans;
pub mod research;
pub mod reviews;

pub use competitors::CompetitorsAdapter;
pub use http::{HttpProviderClient, ProviderClient, RetryPolicy};
pub use loans::LoansAdapter;
pub use research::ResearchAdapter;
pub use reviews::ReviewsAdapter;

use crate::error::SourceError;
use crate::models::{BusinessDescriptor, EligibilityProfile, SourceId, SourcePayload};
use async_trait::async_trait;
use serde_json::Value;

/// Default competitor search radius in meters.
pub const DEFAULT_RADIUS_METERS: u32 = 25_000;

/// Default number of loan records requested per state.
pub const DEFAULT_LOAN_LIMIT: u32 = 50;

/// Per-run options that only some adapters look at.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Competitor search radius in meters.
    pub radius_meters: u32,
    /// Two-letter state code; derived from the location when absent.
    pub state: Option<String>,
    /// Maximum number of loan records.
    pub loan_limit: u32,
    /// Profile for the loan eligibility screen.
    pub eligibility: Option<EligibilityProfile>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            radius_meters: DEFAULT_RADIUS_METERS,
            state: None,
            loan_limit: DEFAULT_LOAN_LIMIT,
            eligibility: None,
        }
    }
}

/// What an adapter produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Complete(SourcePayload),
    /// Real but incomplete data, with the reason it is incomplete.
    Partial {
        payload: SourcePayload,
        reason: String,
    },
}

impl From<SourcePayload> for Fetched {
    fn from(payload: SourcePayload) -> Self {
        Fetched::Complete(payload)
    }
}

/// Uniform contract of every data source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Query the provider for `descriptor`.
    ///
    /// Returns [`SourceError::NotFound`] when the query matched nothing;
    /// the aggregator reports that as an empty success.
    async fn fetch(
        &self,
        descriptor: &BusinessDescriptor,
        options: &SourceOptions,
    ) -> Result<Fetched, SourceError>;
}

/// API keys handed to adapter constructors.
#[derive(Clone, Default)]
pub struct Credentials {
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub sba_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |key: &Option<String>| if key.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("google_api_key", &mask(&self.google_api_key))
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("sba_api_key", &mask(&self.sba_api_key))
            .finish()
    }
}

/// Validate that a required key is present and not blank.
pub(crate) fn require_key(key: Option<&str>, name: &str) -> Result<String, SourceError> {
    match key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(SourceError::Configuration(format!(
            "{} is required but was not provided",
            name
        ))),
    }
}

// ---------------------------------------------------------------------------
// Schema helpers for loosely-typed provider responses
// ---------------------------------------------------------------------------

pub(crate) fn str_or(value: &Value, key: &str, default: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

pub(crate) fn opt_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(['$', ','], "").parse().ok(),
        _ => None,
    })
}

pub(crate) fn opt_u64(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Text form of a scalar field, whatever JSON type the provider used.
pub(crate) fn scalar_string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Interpret the `status` field of a places-style response.
///
/// `OK` passes; empty result statuses become [`SourceError::NotFound`];
/// denied requests become [`SourceError::Configuration`]; anything else is
/// an upstream error carrying the provider's status and message.
pub(crate) fn check_places_status(response: &Value, what: &str) -> Result<(), SourceError> {
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Parse(format!("{} response has no status field", what)))?;
    let message = str_or(response, "error_message", "");

    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(SourceError::NotFound(format!(
            "{} returned {}",
            what, status
        ))),
        "REQUEST_DENIED" => Err(SourceError::Configuration(format!(
            "{} request denied: {}",
            what, message
        ))),
        other => Err(SourceError::upstream(other, format!("{}: {}", what, message))),
    }
}
