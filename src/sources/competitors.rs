//! Nearby competitors from the places provider.
//!
//! Geocodes the location, then runs a nearby search keyed on the business
//! type and follows page tokens up to a configured page count.

use super::{
    check_places_status, opt_f64, opt_u64, require_key, str_or, Fetched, ProviderClient,
    SourceAdapter, SourceOptions,
};
use crate::error::SourceError;
use crate::models::{BusinessDescriptor, Competitor, CompetitorsPayload, SourceId, SourcePayload};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Endpoints and paging behaviour for the competitor search.
#[derive(Debug, Clone)]
pub struct CompetitorsSettings {
    pub places_url: String,
    pub geocode_url: String,
    /// Pages to fetch, including the first one.
    pub max_pages: u32,
    /// Wait before using a page token; the provider rejects tokens used too early.
    pub page_delay: Duration,
}

pub struct CompetitorsAdapter {
    client: Arc<dyn ProviderClient>,
    api_key: String,
    settings: CompetitorsSettings,
}

impl CompetitorsAdapter {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        api_key: Option<&str>,
        settings: CompetitorsSettings,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            api_key: require_key(api_key, "GOOGLE_API_KEY")?,
            settings: CompetitorsSettings {
                places_url: settings.places_url.trim_end_matches('/').to_string(),
                ..settings
            },
        })
    }

    async fn geocode(&self, location: &str) -> Result<(f64, f64), SourceError> {
        let query = [
            ("address", location.to_string()),
            ("key", self.api_key.clone()),
        ];

        let response = self.client.search(&self.settings.geocode_url, &query).await?;
        check_places_status(&response, "geocode")?;

        let coords = response
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|first| first.pointer("/geometry/location"))
            .ok_or_else(|| SourceError::NotFound(format!("cannot geocode '{}'", location)))?;

        match (opt_f64(coords, "lat"), opt_f64(coords, "lng")) {
            (Some(lat), Some(lng)) => Ok((lat, lng)),
            _ => Err(SourceError::Parse(
                "geocode result is missing lat/lng".to_string(),
            )),
        }
    }

    /// Fetch one page of nearby results and the token for the next page.
    async fn nearby_page(
        &self,
        query: &[(&str, String)],
    ) -> Result<(Vec<Competitor>, Option<String>), SourceError> {
        let url = format!("{}/nearbysearch/json", self.settings.places_url);
        let response = self.client.search(&url, query).await?;
        check_places_status(&response, "nearby search")?;

        let results = match response.get("results") {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => return Ok((Vec::new(), None)),
            Some(_) => {
                return Err(SourceError::Parse(
                    "nearby search 'results' is not a list".to_string(),
                ))
            }
        };

        let competitors = results
            .iter()
            .filter(|place| place.is_object())
            .map(normalize_place)
            .collect();
        let next = response
            .get("next_page_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(String::from);

        Ok((competitors, next))
    }
}

#[async_trait]
impl SourceAdapter for CompetitorsAdapter {
    fn id(&self) -> SourceId {
        SourceId::Competitors
    }

    async fn fetch(
        &self,
        descriptor: &BusinessDescriptor,
        options: &SourceOptions,
    ) -> Result<Fetched, SourceError> {
        let (lat, lng) = self.geocode(descriptor.location()).await?;
        debug!("Geocoded {} to {},{}", descriptor.location(), lat, lng);

        let keyword = descriptor
            .business_type()
            .unwrap_or_else(|| descriptor.name())
            .to_string();

        let first_query = [
            ("location", format!("{},{}", lat, lng)),
            ("radius", options.radius_meters.to_string()),
            ("keyword", keyword.clone()),
            ("key", self.api_key.clone()),
        ];

        let (mut competitors, mut next_token) = self.nearby_page(&first_query).await?;
        let mut degraded = None;
        let mut page = 1;

        while let Some(token) = next_token.take() {
            if page >= self.settings.max_pages {
                debug!("Stopping after {} pages", page);
                break;
            }

            tokio::time::sleep(self.settings.page_delay).await;
            let query = [("pagetoken", token), ("key", self.api_key.clone())];

            match self.nearby_page(&query).await {
                Ok((mut more, next)) => {
                    competitors.append(&mut more);
                    next_token = next;
                    page += 1;
                }
                Err(e) => {
                    warn!("Competitor page {} failed: {}", page + 1, e);
                    degraded = Some(format!(
                        "results page {} unavailable ({}); returning {} competitors from earlier pages",
                        page + 1,
                        e,
                        competitors.len()
                    ));
                    break;
                }
            }
        }

        sort_competitors(&mut competitors);
        info!(
            "Found {} competitors for '{}' within {}m of {}",
            competitors.len(),
            keyword,
            options.radius_meters,
            descriptor.location()
        );

        let payload = SourcePayload::Competitors(CompetitorsPayload {
            radius_meters: options.radius_meters,
            competitors,
        });

        Ok(match degraded {
            Some(reason) => Fetched::Partial { payload, reason },
            None => Fetched::Complete(payload),
        })
    }
}

fn normalize_place(place: &Value) -> Competitor {
    let types = place
        .get("types")
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    Competitor {
        name: str_or(place, "name", ""),
        address: str_or(place, "vicinity", ""),
        rating: opt_f64(place, "rating"),
        user_ratings_total: opt_u64(place, "user_ratings_total").unwrap_or(0),
        place_id: str_or(place, "place_id", ""),
        types,
        price_level: opt_u64(place, "price_level").and_then(|p| u8::try_from(p).ok()),
        business_status: str_or(place, "business_status", "UNKNOWN"),
    }
}

/// Highest rating first, then most reviews; unrated places go last.
fn sort_competitors(competitors: &mut [Competitor]) {
    competitors.sort_by(|a, b| {
        let by_rating = match (a.rating, b.rating) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_rating.then_with(|| b.user_ratings_total.cmp(&a.user_ratings_total))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::http::stub::StubClient;
    use serde_json::json;

    fn settings(max_pages: u32) -> CompetitorsSettings {
        CompetitorsSettings {
            places_url: "https://places.test/place".to_string(),
            geocode_url: "https://places.test/geocode/json".to_string(),
            max_pages,
            page_delay: Duration::from_millis(1),
        }
    }

    fn descriptor(business_type: Option<&str>) -> BusinessDescriptor {
        BusinessDescriptor::new(
            "Big Y World Class Market",
            business_type.map(String::from),
            "Springfield, MA",
            None,
        )
        .unwrap()
    }

    fn geocode_ok() -> Value {
        json!({
            "status": "OK",
            "results": [{"geometry": {"location": {"lat": 42.1015, "lng": -72.5898}}}]
        })
    }

    fn page(names: &[(&str, f64, u64)], next: Option<&str>) -> Value {
        let results: Vec<Value> = names
            .iter()
            .map(|(name, rating, total)| {
                json!({
                    "name": name,
                    "vicinity": "Springfield",
                    "rating": rating,
                    "user_ratings_total": total,
                    "place_id": format!("id-{}", name),
                    "types": ["grocery_or_supermarket", "store"],
                    "business_status": "OPERATIONAL"
                })
            })
            .collect();

        let mut value = json!({"status": "OK", "results": results});
        if let Some(token) = next {
            value["next_page_token"] = json!(token);
        }
        value
    }

    fn payload(fetched: &Fetched) -> &CompetitorsPayload {
        match fetched {
            Fetched::Complete(SourcePayload::Competitors(p))
            | Fetched::Partial {
                payload: SourcePayload::Competitors(p),
                ..
            } => p,
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eight_competitors_within_radius() {
        let names: Vec<(String, f64, u64)> = (0..8)
            .map(|i| (format!("Market {}", i), 3.5 + i as f64 * 0.1, 100 + i))
            .collect();
        let refs: Vec<(&str, f64, u64)> =
            names.iter().map(|(n, r, t)| (n.as_str(), *r, *t)).collect();

        let stub = Arc::new(StubClient::new(vec![Ok(geocode_ok()), Ok(page(&refs, None))]));
        let adapter = CompetitorsAdapter::new(stub.clone(), Some("k"), settings(2)).unwrap();

        let fetched = adapter
            .fetch(&descriptor(Some("Grocery Store")), &SourceOptions::default())
            .await
            .unwrap();

        assert!(matches!(fetched, Fetched::Complete(_)));
        let p = payload(&fetched);
        assert_eq!(p.radius_meters, 25_000);
        assert_eq!(p.competitors.len(), 8);
        assert_eq!(p.competitors[0].name, "Market 7");
        assert_eq!(p.competitors[0].types, "grocery_or_supermarket, store");

        let requests = stub.requests();
        assert_eq!(requests[1].param("radius"), Some("25000"));
        assert_eq!(requests[1].param("keyword"), Some("Grocery Store"));
        assert_eq!(requests[1].param("location"), Some("42.1015,-72.5898"));
    }

    #[tokio::test]
    async fn test_follows_page_token() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(geocode_ok()),
            Ok(page(&[("A", 4.0, 10)], Some("tok"))),
            Ok(page(&[("B", 4.5, 5)], None)),
        ]));
        let adapter = CompetitorsAdapter::new(stub.clone(), Some("k"), settings(2)).unwrap();

        let fetched = adapter
            .fetch(&descriptor(Some("grocery")), &SourceOptions::default())
            .await
            .unwrap();

        let p = payload(&fetched);
        assert_eq!(p.competitors.len(), 2);
        assert_eq!(p.competitors[0].name, "B");
        assert_eq!(stub.requests()[2].param("pagetoken"), Some("tok"));
    }

    #[tokio::test]
    async fn test_page_limit_is_respected() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(geocode_ok()),
            Ok(page(&[("A", 4.0, 10)], Some("tok"))),
        ]));
        let adapter = CompetitorsAdapter::new(stub.clone(), Some("k"), settings(1)).unwrap();

        let fetched = adapter
            .fetch(&descriptor(Some("grocery")), &SourceOptions::default())
            .await
            .unwrap();

        assert_eq!(payload(&fetched).competitors.len(), 1);
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_second_page_degrades() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(geocode_ok()),
            Ok(page(&[("A", 4.0, 10)], Some("tok"))),
            Ok(json!({"status": "INVALID_REQUEST"})),
        ]));
        let adapter = CompetitorsAdapter::new(stub, Some("k"), settings(3)).unwrap();

        let fetched = adapter
            .fetch(&descriptor(Some("grocery")), &SourceOptions::default())
            .await
            .unwrap();

        match &fetched {
            Fetched::Partial { reason, .. } => assert!(reason.contains("page 2")),
            other => panic!("expected partial result, got {:?}", other),
        }
        assert_eq!(payload(&fetched).competitors.len(), 1);
    }

    #[tokio::test]
    async fn test_no_results_is_not_found() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(geocode_ok()),
            Ok(json!({"status": "ZERO_RESULTS", "results": []})),
        ]));
        let adapter = CompetitorsAdapter::new(stub, Some("k"), settings(2)).unwrap();

        let err = adapter
            .fetch(&descriptor(Some("grocery")), &SourceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_keyword_falls_back_to_name() {
        let stub = Arc::new(StubClient::new(vec![
            Ok(geocode_ok()),
            Ok(page(&[], None)),
        ]));
        let adapter = CompetitorsAdapter::new(stub.clone(), Some("k"), settings(2)).unwrap();
        let options = SourceOptions {
            radius_meters: 5_000,
            ..SourceOptions::default()
        };

        let fetched = adapter.fetch(&descriptor(None), &options).await.unwrap();

        assert!(payload(&fetched).competitors.is_empty());
        let requests = stub.requests();
        assert_eq!(requests[1].param("keyword"), Some("Big Y World Class Market"));
        assert_eq!(requests[1].param("radius"), Some("5000"));
    }

    #[test]
    fn test_normalize_place_sentinels() {
        let competitor = normalize_place(&json!({"price_level": 2}));
        assert_eq!(competitor.name, "");
        assert_eq!(competitor.rating, None);
        assert_eq!(competitor.user_ratings_total, 0);
        assert_eq!(competitor.price_level, Some(2));
        assert_eq!(competitor.business_status, "UNKNOWN");
    }

    #[test]
    fn test_sort_puts_unrated_last() {
        let mut competitors = vec![
            normalize_place(&json!({"name": "none"})),
            normalize_place(&json!({"name": "low", "rating": 3.0})),
            normalize_place(&json!({"name": "high-few", "rating": 4.8, "user_ratings_total": 3})),
            normalize_place(&json!({"name": "high-many", "rating": 4.8, "user_ratings_total": 90})),
        ];
        sort_competitors(&mut competitors);

        let names: Vec<&str> = competitors.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["high-many", "high-few", "low", "none"]);
    }
}
