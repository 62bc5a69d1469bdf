//! Customer reviews from the places provider.
//!
//! Two requests: find the place from "<name> <location>", then fetch its
//! details including the review list.

use super::{
    check_places_status, opt_f64, opt_u64, require_key, str_or, Fetched, ProviderClient,
    SourceAdapter, SourceOptions,
};
use crate::error::SourceError;
use crate::models::{
    BusinessDescriptor, PlaceSummary, Review, ReviewsPayload, SourceId, SourcePayload,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const DETAIL_FIELDS: &str =
    "name,formatted_address,rating,user_ratings_total,reviews,website,formatted_phone_number";

pub struct ReviewsAdapter {
    client: Arc<dyn ProviderClient>,
    api_key: String,
    base_url: String,
}

impl ReviewsAdapter {
    /// Fails with [`SourceError::Configuration`] when the key is missing.
    pub fn new(
        client: Arc<dyn ProviderClient>,
        api_key: Option<&str>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            api_key: require_key(api_key, "GOOGLE_API_KEY")?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn find_place_id(&self, descriptor: &BusinessDescriptor) -> Result<String, SourceError> {
        let url = format!("{}/findplacefromtext/json", self.base_url);
        let query = [
            (
                "input",
                format!("{} {}", descriptor.name(), descriptor.location()),
            ),
            ("inputtype", "textquery".to_string()),
            ("fields", "place_id,name,formatted_address".to_string()),
            ("key", self.api_key.clone()),
        ];

        let response = self.client.search(&url, &query).await?;
        check_places_status(&response, "place search")?;

        response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("place_id"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                SourceError::NotFound(format!(
                    "no place matches '{}' in {}",
                    descriptor.name(),
                    descriptor.location()
                ))
            })
    }

    async fn place_details(&self, place_id: &str) -> Result<Value, SourceError> {
        let url = format!("{}/details/json", self.base_url);
        let query = [
            ("place_id", place_id.to_string()),
            ("fields", DETAIL_FIELDS.to_string()),
            ("key", self.api_key.clone()),
        ];

        let response = self.client.search(&url, &query).await?;
        check_places_status(&response, "place details")?;

        match response.get("result") {
            Some(result) if result.is_object() => Ok(result.clone()),
            _ => Err(SourceError::Parse(
                "place details response has no result object".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SourceAdapter for ReviewsAdapter {
    fn id(&self) -> SourceId {
        SourceId::Reviews
    }

    async fn fetch(
        &self,
        descriptor: &BusinessDescriptor,
        _options: &SourceOptions,
    ) -> Result<Fetched, SourceError> {
        let place_id = self.find_place_id(descriptor).await?;
        debug!("Resolved '{}' to place {}", descriptor.name(), place_id);

        let details = self.place_details(&place_id).await?;
        let payload = normalize_details(&details, descriptor.name())?;

        info!(
            "Fetched {} reviews for {}",
            payload.reviews.len(),
            descriptor.name()
        );
        Ok(SourcePayload::Reviews(payload).into())
    }
}

/// Turn a place-details object into fixed-shape records.
fn normalize_details(details: &Value, fallback_name: &str) -> Result<ReviewsPayload, SourceError> {
    let business_name = str_or(details, "name", fallback_name);

    let reviews = match details.get("reviews") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| Review {
                business_name: business_name.clone(),
                author: str_or(item, "author_name", "Anonymous"),
                rating: opt_f64(item, "rating"),
                text: str_or(item, "text", ""),
                time: item.get("time").and_then(Value::as_i64),
                relative_time: str_or(item, "relative_time_description", ""),
            })
            .collect(),
        Some(_) => {
            return Err(SourceError::Parse(
                "place details 'reviews' is not a list".to_string(),
            ))
        }
    };

    let place = PlaceSummary {
        address: str_or(details, "formatted_address", ""),
        overall_rating: opt_f64(details, "rating"),
        total_ratings: opt_u64(details, "user_ratings_total").unwrap_or(0),
        website: str_or(details, "website", ""),
        phone: str_or(details, "formatted_phone_number", ""),
    };

    Ok(ReviewsPayload {
        place: Some(place),
        reviews,
    })
}
