//! Error taxonomy for source invocations.
//!
//! Every adapter reports failures through [`SourceError`]. The aggregator
//! never propagates these past the source that produced them; they end up
//! recorded in the bundle and in the export manifest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single source did not produce data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Missing or rejected credential for this provider.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The query was valid but matched nothing.
    #[error("no matching data: {0}")]
    NotFound(String),

    /// Transport failure or a provider-side error status.
    #[error("upstream error{}: {message}", .status.as_ref().map(|s| format!(" ({})", s)).unwrap_or_default())]
    Upstream {
        status: Option<String>,
        message: String,
    },

    /// The provider answered with a shape we do not understand.
    #[error("unexpected response: {0}")]
    Parse(String),

    /// The invocation exceeded the caller's budget.
    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl SourceError {
    pub fn upstream(status: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Upstream {
            status: Some(status.into()),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SourceError::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// The taxonomy bucket, used in manifests and summaries.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Configuration(_) => ErrorKind::Configuration,
            SourceError::NotFound(_) => ErrorKind::NotFound,
            SourceError::Upstream { .. } => ErrorKind::Upstream,
            SourceError::Parse(_) => ErrorKind::Parse,
            SourceError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Whether a retry of the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Upstream { status: None, .. } => true,
            SourceError::Upstream {
                status: Some(status),
                ..
            } => status == "429" || status.starts_with('5'),
            _ => false,
        }
    }
}

/// Serializable tag for a [`SourceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Upstream,
    Parse,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "ConfigurationError"),
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Upstream => write!(f, "UpstreamError"),
            ErrorKind::Parse => write!(f, "ParseError"),
            ErrorKind::Timeout => write!(f, "Timeout"),
        }
    }
}

/// Rejection of a business descriptor before any source runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("business name must not be empty")]
    EmptyName,

    #[error("location must not be empty")]
    EmptyLocation,
}
