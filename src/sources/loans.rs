//! Loan-program reference data, state loan records, and an eligibility screen.
//!
//! The program table is static reference material. State loan records come
//! from the public loan-data provider; when that provider fails, the whole
//! source fails. Nothing here substitutes sample rows for live data.

use super::{
    opt_f64, opt_u64, scalar_string, str_or, Fetched, ProviderClient, SourceAdapter,
    SourceOptions,
};
use crate::error::SourceError;
use crate::models::{
    BusinessDescriptor, EligibilityAssessment, EligibilityProfile, LoanProgram, LoanRecord,
    LoansPayload, ProgramRecommendation, SourceId, SourcePayload,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LoansAdapter {
    client: Arc<dyn ProviderClient>,
    /// Optional for this provider; sent when present.
    api_key: Option<String>,
    base_url: String,
    default_state: String,
}

impl LoansAdapter {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        api_key: Option<&str>,
        base_url: impl Into<String>,
        default_state: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_state: default_state.into().to_uppercase(),
        }
    }

    /// Explicit state, else one named in the location, else the default.
    fn resolve_state(&self, descriptor: &BusinessDescriptor, options: &SourceOptions) -> String {
        options
            .state
            .as_deref()
            .and_then(normalize_state)
            .or_else(|| state_code(descriptor.location()))
            .map(String::from)
            .unwrap_or_else(|| self.default_state.clone())
    }

    async fn search_loans(
        &self,
        state: &str,
        limit: u32,
    ) -> Result<(Vec<LoanRecord>, usize), SourceError> {
        let url = format!("{}/loans", self.base_url);
        let mut query = vec![("state", state.to_string()), ("limit", limit.to_string())];
        if let Some(ref key) = self.api_key {
            query.push(("api_key", key.clone()));
        }

        let response = self.client.search(&url, &query).await?;
        let rows = match &response {
            Value::Array(rows) => rows,
            Value::Object(map) => match map.get("results") {
                Some(Value::Array(rows)) => rows,
                _ => {
                    return Err(SourceError::Parse(
                        "loan response object has no 'results' list".to_string(),
                    ))
                }
            },
            _ => {
                return Err(SourceError::Parse(
                    "loan response is neither a list nor an object".to_string(),
                ))
            }
        };

        let records: Vec<LoanRecord> = rows
            .iter()
            .filter(|row| row.is_object())
            .map(normalize_loan)
            .collect();
        let dropped = rows.len() - records.len();

        Ok((records, dropped))
    }
}

#[async_trait]
impl SourceAdapter for LoansAdapter {
    fn id(&self) -> SourceId {
        SourceId::Loans
    }

    async fn fetch(
        &self,
        descriptor: &BusinessDescriptor,
        options: &SourceOptions,
    ) -> Result<Fetched, SourceError> {
        let state = self.resolve_state(descriptor, options);
        debug!("Searching loans in {} (limit {})", state, options.loan_limit);

        let (loans, dropped) = self.search_loans(&state, options.loan_limit).await?;
        info!("Retrieved {} loan records for {}", loans.len(), state);

        let payload = SourcePayload::Loans(LoansPayload {
            state: state.clone(),
            programs: loan_programs(Utc::now().date_naive()),
            loans,
            eligibility: options.eligibility.map(assess_eligibility),
        });

        if dropped > 0 {
            warn!("Dropped {} malformed loan rows", dropped);
            return Ok(Fetched::Partial {
                payload,
                reason: format!("{} loan rows were not records and were dropped", dropped),
            });
        }

        Ok(Fetched::Complete(payload))
    }
}

fn normalize_loan(row: &Value) -> LoanRecord {
    LoanRecord {
        loan_number: scalar_string(row, "loan_number"),
        borrower_name: str_or(row, "borrower_name", ""),
        borrower_state: str_or(row, "borrower_state", ""),
        approval_date: str_or(row, "approval_date", ""),
        loan_amount: opt_f64(row, "loan_amount"),
        program: scalar_string(row, "program"),
        term_months: opt_u64(row, "term_months").and_then(|v| u32::try_from(v).ok()),
        jobs_supported: opt_u64(row, "jobs_supported").and_then(|v| u32::try_from(v).ok()),
        business_type: str_or(row, "business_type", ""),
    }
}

/// Reference terms of the main SBA programs.
pub fn loan_programs(as_of: NaiveDate) -> Vec<LoanProgram> {
    let program = |program: &str,
                   max: &str,
                   rate_type: &str,
                   base: &str,
                   spread: &str,
                   guarantee: &str,
                   use_case: &str| LoanProgram {
        program: program.to_string(),
        max_loan_amount: max.to_string(),
        rate_type: rate_type.to_string(),
        base_rate: base.to_string(),
        typical_spread: spread.to_string(),
        guarantee: guarantee.to_string(),
        use_case: use_case.to_string(),
        last_updated: as_of,
    };

    vec![
        program(
            "SBA 7(a) Loan",
            "$5,000,000",
            "Variable",
            "Prime Rate + spread",
            "2.25% - 2.75%",
            "75-85%",
            "Working capital, equipment, real estate",
        ),
        program(
            "SBA 504 Loan",
            "$5,500,000",
            "Fixed",
            "10-year Treasury + spread",
            "~2.0%",
            "Up to 40%",
            "Real estate, equipment (long-term fixed assets)",
        ),
        program(
            "SBA Microloan",
            "$50,000",
            "Variable",
            "Varies by intermediary",
            "8% - 13%",
            "N/A",
            "Working capital, inventory, supplies",
        ),
        program(
            "SBA Express Loan",
            "$500,000",
            "Variable or Fixed",
            "Prime Rate + spread",
            "4.5% - 6.5%",
            "50%",
            "Quick funding, working capital",
        ),
    ]
}

/// Preliminary program screen; a lender makes the real decision.
pub fn assess_eligibility(profile: EligibilityProfile) -> EligibilityAssessment {
    let recommend = |program: &str, max_amount: &str, notes: &str| ProgramRecommendation {
        program: program.to_string(),
        eligible: "Likely Eligible".to_string(),
        max_amount: max_amount.to_string(),
        notes: notes.to_string(),
    };

    let small_business = profile.annual_revenue <= 30_000_000.0 && profile.employees <= 500;
    let mut recommended = Vec::new();

    if small_business {
        recommended.push(recommend(
            "SBA 7(a) Loan",
            "$5,000,000",
            "Good for working capital, equipment, and real estate",
        ));
    }
    if small_business && profile.years_in_business >= 2 {
        recommended.push(recommend(
            "SBA 504 Loan",
            "$5,500,000",
            "Best for purchasing real estate or equipment",
        ));
    }
    if profile.annual_revenue <= 5_000_000.0 {
        recommended.push(recommend(
            "SBA Microloan",
            "$50,000",
            "Good for small capital needs",
        ));
    }
    if profile.credit_score >= 680 && profile.years_in_business >= 1 {
        recommended.push(recommend(
            "SBA Express Loan",
            "$500,000",
            "Fast approval process",
        ));
    }

    EligibilityAssessment {
        profile,
        recommended_programs: recommended,
        general_notes: "These are preliminary assessments. Consult with an SBA lender for detailed eligibility.".to_string(),
    }
}

static STATES: [(&str, &str); 51] = [
    ("AL", "alabama"),
    ("AK", "alaska"),
    ("AZ", "arizona"),
    ("AR", "arkansas"),
    ("CA", "california"),
    ("CO", "colorado"),
    ("CT", "connecticut"),
    ("DE", "delaware"),
    ("DC", "district of columbia"),
    ("FL", "florida"),
    ("GA", "georgia"),
    ("HI", "hawaii"),
    ("ID", "idaho"),
    ("IL", "illinois"),
    ("IN", "indiana"),
    ("IA", "iowa"),
    ("KS", "kansas"),
    ("KY", "kentucky"),
    ("LA", "louisiana"),
    ("ME", "maine"),
    ("MD", "maryland"),
    ("MA", "massachusetts"),
    ("MI", "michigan"),
    ("MN", "minnesota"),
    ("MS", "mississippi"),
    ("MO", "missouri"),
    ("MT", "montana"),
    ("NE", "nebraska"),
    ("NV", "nevada"),
    ("NH", "new hampshire"),
    ("NJ", "new jersey"),
    ("NM", "new mexico"),
    ("NY", "new york"),
    ("NC", "north carolina"),
    ("ND", "north dakota"),
    ("OH", "ohio"),
    ("OK", "oklahoma"),
    ("OR", "oregon"),
    ("PA", "pennsylvania"),
    ("RI", "rhode island"),
    ("SC", "south carolina"),
    ("SD", "south dakota"),
    ("TN", "tennessee"),
    ("TX", "texas"),
    ("UT", "utah"),
    ("VT", "vermont"),
    ("VA", "virginia"),
    ("WA", "washington"),
    ("WV", "west virginia"),
    ("WI", "wisconsin"),
    ("WY", "wyoming"),
];

/// Find a US state in free text: an upper-case two-letter code standing
/// alone ("Springfield, MA"), or a full state name.
///
/// Comma-separated parts are read from the last one back, so the
/// "City, ST" part decides before a city named after a state. Within a
/// part a code wins over a name, and longer names win so "West Virginia"
/// is not read as Virginia.
pub fn state_code(text: &str) -> Option<&'static str> {
    text.rsplit(',').find_map(|part| {
        let by_code = part
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|token| token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()))
            .rev()
            .find_map(code_for);
        if by_code.is_some() {
            return by_code;
        }

        let lower = part.to_lowercase();
        STATES
            .iter()
            .filter(|(_, name)| contains_words(&lower, name))
            .max_by_key(|(_, name)| name.len())
            .map(|(code, _)| *code)
    })
}

/// Canonical code for a state given as a code in any case or as a name.
pub fn normalize_state(input: &str) -> Option<&'static str> {
    code_for(input.trim()).or_else(|| state_code(input))
}

fn code_for(token: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(token))
        .map(|(code, _)| *code)
}

/// Whether `phrase` occurs in `text` on word boundaries.
fn contains_words(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphabetic());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphabetic());
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::http::stub::StubClient;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn descriptor(location: &str) -> BusinessDescriptor {
        BusinessDescriptor::new("Big Y World Class Market", None, location, None).unwrap()
    }

    fn adapter(stub: Arc<StubClient>, key: Option<&str>) -> LoansAdapter {
        LoansAdapter::new(stub, key, "https://loans.test/api/sba/", "ma")
    }

    #[test]
    fn test_state_code_extraction() {
        assert_eq!(state_code("Springfield, MA"), Some("MA"));
        assert_eq!(state_code("Western Massachusetts"), Some("MA"));
        assert_eq!(state_code("Charleston, West Virginia"), Some("WV"));
        assert_eq!(state_code("Albany NY 12207"), Some("NY"));
        assert_eq!(state_code("Miami"), None);
        assert_eq!(state_code("Kansas City, Missouri"), Some("MO"));
        assert_eq!(state_code("Little Rock, Arkansas"), Some("AR"));
        // Lower-case words that happen to be codes are not states.
        assert_eq!(state_code("a shop in the valley"), None);
    }

    #[test]
    fn test_state_code_prefers_trailing_part_over_city_name() {
        assert_eq!(state_code("Kansas City, MO"), Some("MO"));
        assert_eq!(state_code("Washington, DC"), Some("DC"));
        assert_eq!(state_code("Indiana, PA"), Some("PA"));
        assert_eq!(state_code("Nevada City, CA"), Some("CA"));
        assert_eq!(state_code("Nevada City CA 95959"), Some("CA"));
        assert_eq!(state_code("Springfield, MA 01103"), Some("MA"));
        assert_eq!(state_code("Kansas City"), Some("KS"));
    }

    #[test]
    fn test_normalize_state() {
        assert_eq!(normalize_state("ct"), Some("CT"));
        assert_eq!(normalize_state(" ny "), Some("NY"));
        assert_eq!(normalize_state("Vermont"), Some("VT"));
        assert_eq!(normalize_state("XX"), None);
    }

    #[test]
    fn test_eligibility_rules() {
        let assessment = assess_eligibility(EligibilityProfile {
            annual_revenue: 5_000_000.0,
            employees: 25,
            years_in_business: 5,
            credit_score: 720,
        });
        let programs: Vec<&str> = assessment
            .recommended_programs
            .iter()
            .map(|p| p.program.as_str())
            .collect();
        assert_eq!(
            programs,
            vec![
                "SBA 7(a) Loan",
                "SBA 504 Loan",
                "SBA Microloan",
                "SBA Express Loan"
            ]
        );

        let assessment = assess_eligibility(EligibilityProfile {
            annual_revenue: 40_000_000.0,
            employees: 800,
            years_in_business: 0,
            credit_score: 600,
        });
        assert!(assessment.recommended_programs.is_empty());
    }

    #[test]
    fn test_program_table() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let programs = loan_programs(date);
        assert_eq!(programs.len(), 4);
        assert!(programs.iter().all(|p| p.last_updated == date));
    }

    #[tokio::test]
    async fn test_fetch_loans_from_results_envelope() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!({
            "results": [
                {"loan_number": "SBA-1", "borrower_name": "Corner Deli", "borrower_state": "MA",
                 "loan_amount": 250000, "program": "7(a)", "term_months": 120, "jobs_supported": 5},
                {"loan_number": 2, "borrower_name": "Mill Works", "loan_amount": "$1,200,000"}
            ]
        }))]));

        let options = SourceOptions {
            loan_limit: 10,
            ..SourceOptions::default()
        };
        let fetched = adapter(stub.clone(), Some("sba-key"))
            .fetch(&descriptor("Springfield, MA"), &options)
            .await
            .unwrap();

        let Fetched::Complete(SourcePayload::Loans(payload)) = fetched else {
            panic!("expected complete loans payload");
        };
        assert_eq!(payload.state, "MA");
        assert_eq!(payload.loans.len(), 2);
        assert_eq!(payload.loans[1].loan_number, "2");
        assert_eq!(payload.loans[1].loan_amount, Some(1_200_000.0));
        assert_eq!(payload.loans[1].term_months, None);
        assert_eq!(payload.programs.len(), 4);
        assert!(payload.eligibility.is_none());

        let request = &stub.requests()[0];
        assert_eq!(request.url, "https://loans.test/api/sba/loans");
        assert_eq!(request.param("limit"), Some("10"));
        assert_eq!(request.param("api_key"), Some("sba-key"));
    }

    #[tokio::test]
    async fn test_explicit_state_and_eligibility() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!([]))]));
        let options = SourceOptions {
            state: Some("ct".to_string()),
            eligibility: Some(EligibilityProfile {
                annual_revenue: 1_000_000.0,
                employees: 10,
                years_in_business: 3,
                credit_score: 700,
            }),
            ..SourceOptions::default()
        };

        let fetched = adapter(stub.clone(), None)
            .fetch(&descriptor("Springfield, MA"), &options)
            .await
            .unwrap();

        let Fetched::Complete(SourcePayload::Loans(payload)) = fetched else {
            panic!("expected complete loans payload");
        };
        assert_eq!(payload.state, "CT");
        assert!(payload.loans.is_empty());
        assert_eq!(
            payload.eligibility.map(|e| e.recommended_programs.len()),
            Some(4)
        );

        let request = &stub.requests()[0];
        assert_eq!(request.param("state"), Some("CT"));
        assert_eq!(request.param("api_key"), None);
    }

    #[tokio::test]
    async fn test_unknown_location_uses_default_state() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!([]))]));
        adapter(stub.clone(), None)
            .fetch(&descriptor("Pioneer Valley"), &SourceOptions::default())
            .await
            .unwrap();
        assert_eq!(stub.requests()[0].param("state"), Some("MA"));
    }

    #[tokio::test]
    async fn test_city_named_after_state_uses_trailing_code() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!([]))]));
        let fetched = adapter(stub.clone(), None)
            .fetch(&descriptor("Kansas City, MO"), &SourceOptions::default())
            .await;

        let fetched = assert_ok!(fetched);
        assert_eq!(stub.requests()[0].param("state"), Some("MO"));
        match fetched {
            Fetched::Complete(SourcePayload::Loans(payload)) => assert_eq!(payload.state, "MO"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_provider_fails_without_sample_data() {
        let stub = Arc::new(StubClient::new(vec![Err(SourceError::transport(
            "cannot connect",
        ))]));

        let result = adapter(stub, None)
            .fetch(&descriptor("Springfield, MA"), &SourceOptions::default())
            .await;
        let err = assert_err!(result);
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_parse_error() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!({"data": []}))]));
        let err = adapter(stub, None)
            .fetch(&descriptor("Springfield, MA"), &SourceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[tokio::test]
    async fn test_non_record_rows_degrade() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!([
            {"loan_number": "SBA-1"},
            "not a record",
            null
        ]))]));

        let fetched = adapter(stub, None)
            .fetch(&descriptor("Springfield, MA"), &SourceOptions::default())
            .await
            .unwrap();

        match fetched {
            Fetched::Partial { payload, reason } => {
                assert_eq!(payload.record_count(), 1);
                assert!(reason.contains("2 loan rows"));
            }
            other => panic!("expected partial result, got {:?}", other),
        }
    }
}
