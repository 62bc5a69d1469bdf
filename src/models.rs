//! Data models for business intelligence aggregation.
//!
//! This module contains the descriptor of the business under analysis,
//! the normalized record types every source produces, and the bundle that
//! collects one result per requested source.

use crate::error::{DescriptorError, SourceError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of an independent data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Customer reviews from the places provider
    Reviews,
    /// Nearby businesses of the same type
    Competitors,
    /// LLM-synthesized research
    Research,
    /// Public loan-program and loan data
    Loans,
}

impl SourceId {
    /// Every source, in display order.
    pub const ALL: [SourceId; 4] = [
        SourceId::Reviews,
        SourceId::Competitors,
        SourceId::Research,
        SourceId::Loans,
    ];

    /// Stable identifier used in file names and manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Reviews => "reviews",
            SourceId::Competitors => "competitors",
            SourceId::Research => "research",
            SourceId::Loans => "loans",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            SourceId::Reviews => "Reviews",
            SourceId::Competitors => "Competitors",
            SourceId::Research => "AI Research",
            SourceId::Loans => "Loan Information",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reviews" | "review" => Ok(SourceId::Reviews),
            "competitors" | "competitor" => Ok(SourceId::Competitors),
            "research" | "ai" => Ok(SourceId::Research),
            "loans" | "loan" | "sba" => Ok(SourceId::Loans),
            other => Err(format!(
                "unknown source '{}' (expected reviews, competitors, research, loans)",
                other
            )),
        }
    }
}

/// The business under analysis.
///
/// Built once through [`BusinessDescriptor::new`], which rejects blank
/// required fields, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessDescriptor {
    name: String,
    business_type: Option<String>,
    location: String,
    context: Option<String>,
}

impl BusinessDescriptor {
    pub fn new(
        name: impl Into<String>,
        business_type: Option<String>,
        location: impl Into<String>,
        context: Option<String>,
    ) -> Result<Self, DescriptorError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        let location = location.into().trim().to_string();
        if location.is_empty() {
            return Err(DescriptorError::EmptyLocation);
        }

        Ok(Self {
            name,
            business_type: non_blank(business_type),
            location,
            context: non_blank(context),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn business_type(&self) -> Option<&str> {
        self.business_type.as_deref()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Reviews
// ---------------------------------------------------------------------------

/// A single customer review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub business_name: String,
    /// `"Anonymous"` when the provider omits it.
    pub author: String,
    pub rating: Option<f64>,
    pub text: String,
    /// Unix seconds.
    pub time: Option<i64>,
    pub relative_time: String,
}

/// Place-level information returned alongside reviews.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceSummary {
    pub address: String,
    pub overall_rating: Option<f64>,
    pub total_ratings: u64,
    pub website: String,
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewsPayload {
    pub place: Option<PlaceSummary>,
    pub reviews: Vec<Review>,
}

// ---------------------------------------------------------------------------
// Competitors
// ---------------------------------------------------------------------------

/// A nearby business of the same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    pub address: String,
    pub rating: Option<f64>,
    pub user_ratings_total: u64,
    pub place_id: String,
    pub types: String,
    pub price_level: Option<u8>,
    /// `"UNKNOWN"` when the provider omits it.
    pub business_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitorsPayload {
    pub radius_meters: u32,
    pub competitors: Vec<Competitor>,
}

/// Aggregate statistics over a competitor list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompetitorStats {
    pub total: usize,
    pub average_rating: Option<f64>,
    pub median_rating: Option<f64>,
    pub total_reviews: u64,
    pub average_reviews: f64,
}

impl CompetitorStats {
    pub fn from_competitors(competitors: &[Competitor]) -> Self {
        let mut ratings: Vec<f64> = competitors.iter().filter_map(|c| c.rating).collect();
        ratings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let average_rating = if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        };

        let median_rating = match ratings.len() {
            0 => None,
            n if n % 2 == 1 => Some(ratings[n / 2]),
            n => Some((ratings[n / 2 - 1] + ratings[n / 2]) / 2.0),
        };

        let total_reviews: u64 = competitors.iter().map(|c| c.user_ratings_total).sum();
        let average_reviews = if competitors.is_empty() {
            0.0
        } else {
            total_reviews as f64 / competitors.len() as f64
        };

        Self {
            total: competitors.len(),
            average_rating,
            median_rating,
            total_reviews,
            average_reviews,
        }
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

/// The fixed set of headers the research prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    MarketOverview,
    CompetitiveLandscape,
    GrowthOpportunities,
    RiskFactors,
    FinancialConsiderations,
    StrategicRecommendations,
    /// Unparsed text when the response did not follow the header contract.
    General,
}

impl SectionKind {
    /// The structured sections, in prompt order.
    pub const STRUCTURED: [SectionKind; 6] = [
        SectionKind::MarketOverview,
        SectionKind::CompetitiveLandscape,
        SectionKind::GrowthOpportunities,
        SectionKind::RiskFactors,
        SectionKind::FinancialConsiderations,
        SectionKind::StrategicRecommendations,
    ];

    /// Header text as it appears in the prompt contract.
    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::MarketOverview => "Market Overview",
            SectionKind::CompetitiveLandscape => "Competitive Landscape",
            SectionKind::GrowthOpportunities => "Growth Opportunities",
            SectionKind::RiskFactors => "Risk Factors",
            SectionKind::FinancialConsiderations => "Financial Considerations",
            SectionKind::StrategicRecommendations => "Strategic Recommendations",
            SectionKind::General => "Analysis",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSection {
    pub kind: SectionKind,
    pub body: String,
}

/// LLM analysis of the business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub model: String,
    pub tokens_used: u64,
    pub text: String,
    pub sections: Vec<ResearchSection>,
    /// False when the response missed at least one expected header; the
    /// whole text is then a single [`SectionKind::General`] section.
    pub structured: bool,
}

impl ResearchReport {
    #[allow(dead_code)] // Lookup helper for callers that want one section
    pub fn section(&self, kind: SectionKind) -> Option<&ResearchSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

/// Reference terms of a loan program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanProgram {
    pub program: String,
    pub max_loan_amount: String,
    pub rate_type: String,
    pub base_rate: String,
    pub typical_spread: String,
    pub guarantee: String,
    pub use_case: String,
    pub last_updated: NaiveDate,
}

/// A loan approved in the requested state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_number: String,
    pub borrower_name: String,
    pub borrower_state: String,
    pub approval_date: String,
    pub loan_amount: Option<f64>,
    pub program: String,
    pub term_months: Option<u32>,
    pub jobs_supported: Option<u32>,
    pub business_type: String,
}

/// Financial facts used for a preliminary eligibility screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EligibilityProfile {
    pub annual_revenue: f64,
    pub employees: u32,
    pub years_in_business: u32,
    pub credit_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecommendation {
    pub program: String,
    pub eligible: String,
    pub max_amount: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityAssessment {
    pub profile: EligibilityProfile,
    pub recommended_programs: Vec<ProgramRecommendation>,
    pub general_notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoansPayload {
    pub state: String,
    pub programs: Vec<LoanProgram>,
    pub loans: Vec<LoanRecord>,
    pub eligibility: Option<EligibilityAssessment>,
}

// ---------------------------------------------------------------------------
// Results and bundle
// ---------------------------------------------------------------------------

/// Data produced by one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourcePayload {
    Reviews(ReviewsPayload),
    Competitors(CompetitorsPayload),
    Research(ResearchReport),
    Loans(LoansPayload),
}

impl SourcePayload {
    /// The empty payload a source reports when its query matched nothing.
    pub fn empty_for(source: SourceId) -> Self {
        match source {
            SourceId::Reviews => SourcePayload::Reviews(ReviewsPayload::default()),
            SourceId::Competitors => SourcePayload::Competitors(CompetitorsPayload::default()),
            SourceId::Research => SourcePayload::Research(ResearchReport {
                model: String::new(),
                tokens_used: 0,
                text: String::new(),
                sections: Vec::new(),
                structured: false,
            }),
            SourceId::Loans => SourcePayload::Loans(LoansPayload {
                state: String::new(),
                programs: Vec::new(),
                loans: Vec::new(),
                eligibility: None,
            }),
        }
    }

    #[allow(dead_code)] // Payloads are keyed by source in the bundle already
    pub fn source(&self) -> SourceId {
        match self {
            SourcePayload::Reviews(_) => SourceId::Reviews,
            SourcePayload::Competitors(_) => SourceId::Competitors,
            SourcePayload::Research(_) => SourceId::Research,
            SourcePayload::Loans(_) => SourceId::Loans,
        }
    }

    /// Number of primary records (reviews, competitors, sections, loans).
    pub fn record_count(&self) -> usize {
        match self {
            SourcePayload::Reviews(p) => p.reviews.len(),
            SourcePayload::Competitors(p) => p.competitors.len(),
            SourcePayload::Research(r) => r.sections.len(),
            SourcePayload::Loans(p) => p.loans.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SourcePayload::Research(r) => r.text.trim().is_empty(),
            SourcePayload::Loans(p) => p.programs.is_empty() && p.loans.is_empty(),
            _ => self.record_count() == 0,
        }
    }
}

/// Outcome of invoking one source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    Success(SourcePayload),
    /// Real data that is known to be incomplete.
    Degraded {
        payload: SourcePayload,
        reason: String,
    },
    Failure(SourceError),
}

impl SourceResult {
    pub fn payload(&self) -> Option<&SourcePayload> {
        match self {
            SourceResult::Success(payload) | SourceResult::Degraded { payload, .. } => {
                Some(payload)
            }
            SourceResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SourceError> {
        match self {
            SourceResult::Failure(err) => Some(err),
            _ => None,
        }
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            SourceResult::Success(_) => SourceStatus::Success,
            SourceResult::Degraded { .. } => SourceStatus::Degraded,
            SourceResult::Failure(_) => SourceStatus::Failed,
        }
    }
}

/// Per-source status as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Degraded,
    Failed,
    /// Not selected for this run.
    Skipped,
}

impl SourceStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            SourceStatus::Success => "✅",
            SourceStatus::Degraded => "⚠️",
            SourceStatus::Failed => "❌",
            SourceStatus::Skipped => "⏭️",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Success => write!(f, "Success"),
            SourceStatus::Degraded => write!(f, "Degraded"),
            SourceStatus::Failed => write!(f, "Failed"),
            SourceStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// One result per requested source for a single aggregation run.
#[derive(Debug, Clone)]
pub struct AggregationBundle {
    descriptor: BusinessDescriptor,
    created_at: DateTime<Utc>,
    results: BTreeMap<SourceId, SourceResult>,
}

impl AggregationBundle {
    pub(crate) fn new(descriptor: BusinessDescriptor, created_at: DateTime<Utc>) -> Self {
        Self {
            descriptor,
            created_at,
            results: BTreeMap::new(),
        }
    }

    /// Record the outcome of a source. Each source resolves exactly once.
    pub(crate) fn insert(&mut self, source: SourceId, result: SourceResult) {
        let previous = self.results.insert(source, result);
        debug_assert!(previous.is_none(), "source {} resolved twice", source);
    }

    pub fn descriptor(&self) -> &BusinessDescriptor {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn get(&self, source: SourceId) -> Option<&SourceResult> {
        self.results.get(&source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &SourceResult)> {
        self.results.iter().map(|(id, result)| (*id, result))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Status of a source, including sources that were never requested.
    pub fn status(&self, source: SourceId) -> SourceStatus {
        self.results
            .get(&source)
            .map(SourceResult::status)
            .unwrap_or(SourceStatus::Skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = (SourceId, &SourceError)> {
        self.iter()
            .filter_map(|(id, result)| result.error().map(|err| (id, err)))
    }
}

/// A persisted output unit derived from one source's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportArtifact {
    pub source: SourceId,
    /// File stem shared by every file of this artifact.
    pub name: String,
    pub path: PathBuf,
    /// Extra sheets written next to the primary file.
    pub companions: Vec<PathBuf>,
}
