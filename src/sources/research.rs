//! LLM business analysis.
//!
//! The prompt asks for six Markdown sections with fixed headers. The
//! response is split on those headers; when any header is missing the raw
//! text is kept as a single general section instead of failing.

use super::{require_key, Fetched, ProviderClient, SourceAdapter, SourceOptions};
use crate::error::SourceError;
use crate::models::{
    BusinessDescriptor, ResearchReport, ResearchSection, SectionKind, SourceId, SourcePayload,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are an expert business analyst specializing in private equity \
due diligence and financial modeling. Provide comprehensive, data-driven insights.";

/// Model parameters for the analysis request.
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

pub struct ResearchAdapter {
    client: Arc<dyn ProviderClient>,
    settings: ResearchSettings,
}

impl ResearchAdapter {
    /// The key itself travels as a bearer token on the client; it is only
    /// checked for presence here.
    pub fn new(
        client: Arc<dyn ProviderClient>,
        api_key: Option<&str>,
        settings: ResearchSettings,
    ) -> Result<Self, SourceError> {
        require_key(api_key, "OPENAI_API_KEY")?;
        Ok(Self { client, settings })
    }

    fn request_body(&self, descriptor: &BusinessDescriptor) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(descriptor)}
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens
        })
    }
}

#[async_trait]
impl SourceAdapter for ResearchAdapter {
    fn id(&self) -> SourceId {
        SourceId::Research
    }

    async fn fetch(
        &self,
        descriptor: &BusinessDescriptor,
        _options: &SourceOptions,
    ) -> Result<Fetched, SourceError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        debug!("Requesting analysis from {} ({})", url, self.settings.model);

        let response = self
            .client
            .submit(&url, &self.request_body(descriptor))
            .await?;

        let text = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SourceError::Parse("completion has no choices[0].message.content".to_string())
            })?;
        if text.trim().is_empty() {
            return Err(SourceError::NotFound(
                "model returned an empty analysis".to_string(),
            ));
        }

        let model = response
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.settings.model)
            .to_string();
        let tokens_used = response
            .pointer("/usage/total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let (sections, structured) = parse_sections(text);
        if !structured {
            warn!("Analysis did not follow the section headers; keeping raw text");
        }
        info!(
            "Received {} section analysis from {} ({} tokens)",
            sections.len(),
            model,
            tokens_used
        );

        Ok(SourcePayload::Research(ResearchReport {
            model,
            tokens_used,
            text: text.to_string(),
            sections,
            structured,
        })
        .into())
    }
}

/// User prompt demanding the six fixed section headers.
pub fn build_prompt(descriptor: &BusinessDescriptor) -> String {
    let mut prompt = String::new();

    prompt.push_str("Conduct a comprehensive business analysis for the following company:\n\n");
    prompt.push_str(&format!("Business Name: {}\n", descriptor.name()));
    prompt.push_str(&format!(
        "Industry/Type: {}\n",
        descriptor.business_type().unwrap_or("Not specified")
    ));
    prompt.push_str(&format!("Location: {}\n", descriptor.location()));
    if let Some(context) = descriptor.context() {
        prompt.push_str(&format!("\nAdditional Context: {}\n", context));
    }

    prompt.push_str(
        "\nStructure the response as Markdown using exactly these section headers, in order:\n\n",
    );
    for kind in SectionKind::STRUCTURED {
        prompt.push_str(&format!("## {}\n", kind.title()));
    }
    prompt.push_str(
        "\nCover market trends, key competitors and positioning, areas for expansion, \
         challenges and threats, financial metrics relevant to an acquisition, and actionable \
         recommendations for a private equity investor.\n",
    );

    prompt
}

/// Split analysis text on the section headers.
///
/// Returns the sections and whether every structured header was found.
pub fn parse_sections(text: &str) -> (Vec<ResearchSection>, bool) {
    let mut found: Vec<(SectionKind, Vec<&str>)> = Vec::new();

    for line in text.lines() {
        match header_kind(line) {
            Some(kind) if !found.iter().any(|(k, _)| *k == kind) => {
                found.push((kind, Vec::new()));
            }
            _ => {
                if let Some((_, body)) = found.last_mut() {
                    body.push(line);
                }
            }
        }
    }

    let complete = SectionKind::STRUCTURED
        .iter()
        .all(|kind| found.iter().any(|(k, _)| k == kind));

    if !complete {
        return (
            vec![ResearchSection {
                kind: SectionKind::General,
                body: text.trim().to_string(),
            }],
            false,
        );
    }

    let sections = found
        .into_iter()
        .map(|(kind, lines)| ResearchSection {
            kind,
            body: lines.join("\n").trim().to_string(),
        })
        .collect();
    (sections, true)
}

/// Recognize a header line such as `## Risk Factors`, `### 4. Risk Factors`
/// or `**Risk Factors:**`.
fn header_kind(line: &str) -> Option<SectionKind> {
    let mut title = line.trim().trim_start_matches('#').trim();
    title = title.trim_matches(|c| c == '*' || c == '_').trim();

    let digits = title.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &title[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            title = rest.trim();
        }
    }
    title = title
        .trim_matches(|c| c == '*' || c == '_')
        .trim_end_matches(':')
        .trim();

    SectionKind::STRUCTURED
        .into_iter()
        .find(|kind| kind.title().eq_ignore_ascii_case(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::http::stub::StubClient;

    const STRUCTURED_TEXT: &str = "\
Intro line before any header.

## Market Overview
Grocery demand in the region is stable.

## Competitive Landscape
Stop & Shop and Price Chopper compete nearby.

### 3. Growth Opportunities
Prepared foods.

**Risk Factors:**
Thin margins.

## FINANCIAL CONSIDERATIONS
Real estate heavy.

# 6. Strategic Recommendations
Hold.
";

    fn descriptor() -> BusinessDescriptor {
        BusinessDescriptor::new(
            "Big Y World Class Market",
            Some("Grocery Store".to_string()),
            "Springfield, MA",
            Some("Family owned".to_string()),
        )
        .unwrap()
    }

    fn adapter(stub: Arc<StubClient>) -> ResearchAdapter {
        ResearchAdapter::new(stub, Some("sk-test"), ResearchSettings::default()).unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"total_tokens": 1834}
        })
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = ResearchAdapter::new(
            Arc::new(StubClient::default()),
            None,
            ResearchSettings::default(),
        )
        .err();
        assert!(matches!(err, Some(SourceError::Configuration(m)) if m.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn test_prompt_contains_descriptor_and_headers() {
        let prompt = build_prompt(&descriptor());
        assert!(prompt.contains("Business Name: Big Y World Class Market"));
        assert!(prompt.contains("Industry/Type: Grocery Store"));
        assert!(prompt.contains("Additional Context: Family owned"));
        for kind in SectionKind::STRUCTURED {
            assert!(prompt.contains(&format!("## {}", kind.title())));
        }
    }

    #[test]
    fn test_parse_all_sections() {
        let (sections, structured) = parse_sections(STRUCTURED_TEXT);
        assert!(structured);
        assert_eq!(sections.len(), 6);
        assert_eq!(sections[0].kind, SectionKind::MarketOverview);
        assert_eq!(sections[0].body, "Grocery demand in the region is stable.");
        assert_eq!(sections[3].kind, SectionKind::RiskFactors);
        assert_eq!(sections[3].body, "Thin margins.");
        assert_eq!(sections[5].body, "Hold.");
    }

    #[test]
    fn test_missing_section_falls_back_to_general() {
        let text = "## Market Overview\nStable.\n\n## Risk Factors\nMargins.";
        let (sections, structured) = parse_sections(text);
        assert!(!structured);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, SectionKind::General);
        assert_eq!(sections[0].body, text);
    }

    #[test]
    fn test_header_recognition() {
        assert_eq!(header_kind("## Market Overview"), Some(SectionKind::MarketOverview));
        assert_eq!(header_kind("1. market overview:"), Some(SectionKind::MarketOverview));
        assert_eq!(header_kind("**2) Competitive Landscape**"), Some(SectionKind::CompetitiveLandscape));
        assert_eq!(header_kind("Market Overview of the region"), None);
        assert_eq!(header_kind(""), None);
    }

    #[tokio::test]
    async fn test_fetch_structured_analysis() {
        let stub = Arc::new(StubClient::new(vec![Ok(completion(STRUCTURED_TEXT))]));

        let fetched = adapter(stub.clone())
            .fetch(&descriptor(), &SourceOptions::default())
            .await
            .unwrap();

        let Fetched::Complete(SourcePayload::Research(report)) = fetched else {
            panic!("expected complete research payload");
        };
        assert!(report.structured);
        assert_eq!(report.model, "gpt-4o-2024-08-06");
        assert_eq!(report.tokens_used, 1834);
        assert!(report.section(SectionKind::FinancialConsiderations).is_some());

        let requests = stub.requests();
        assert_eq!(requests[0].url, "https://api.openai.com/v1/chat/completions");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn test_unstructured_analysis_is_still_success() {
        let stub = Arc::new(StubClient::new(vec![Ok(completion(
            "Big Y is a regional grocer with loyal customers.",
        ))]));

        let fetched = adapter(stub)
            .fetch(&descriptor(), &SourceOptions::default())
            .await
            .unwrap();

        let Fetched::Complete(SourcePayload::Research(report)) = fetched else {
            panic!("expected complete research payload");
        };
        assert!(!report.structured);
        assert_eq!(report.sections[0].kind, SectionKind::General);
    }

    #[tokio::test]
    async fn test_missing_usage_reports_zero_tokens() {
        let stub = Arc::new(StubClient::new(vec![Ok(json!({
            "choices": [{"message": {"content": "Short."}}]
        }))]));

        let fetched = adapter(stub)
            .fetch(&descriptor(), &SourceOptions::default())
            .await
            .unwrap();

        let Fetched::Complete(SourcePayload::Research(report)) = fetched else {
            panic!("expected complete research payload");
        };
        assert_eq!(report.tokens_used, 0);
        assert_eq!(report.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_response_errors() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(json!({"choices": []})),
            Ok(completion("   ")),
            Err(SourceError::Configuration("credential rejected".to_string())),
        ]));
        let adapter = adapter(stub);
        let options = SourceOptions::default();

        let err = adapter.fetch(&descriptor(), &options).await.unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));

        let err = adapter.fetch(&descriptor(), &options).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));

        let err = adapter.fetch(&descriptor(), &options).await.unwrap_err();
        assert!(matches!(err, SourceError::Configuration(_)));
    }
}
