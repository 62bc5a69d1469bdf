//! Concurrent fan-out over the selected sources.
//!
//! The aggregator owns one registration per [`SourceId`], invokes every
//! selected adapter concurrently, and folds each outcome into an
//! [`AggregationBundle`] as soon as it resolves. A failing, slow or
//! panicking adapter only ever affects its own entry.

use crate::error::SourceError;
use crate::models::{AggregationBundle, BusinessDescriptor, SourceId, SourcePayload, SourceResult};
use crate::sources::{Fetched, SourceAdapter, SourceOptions};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default per-source time limit.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationState {
    NotStarted,
    Running { pending: BTreeSet<SourceId> },
    Completed,
}

impl fmt::Display for AggregationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationState::NotStarted => write!(f, "not started"),
            AggregationState::Running { pending } => {
                let names: Vec<&str> = pending.iter().map(SourceId::as_str).collect();
                write!(f, "running (pending: {})", names.join(", "))
            }
            AggregationState::Completed => write!(f, "completed"),
        }
    }
}

enum Registration {
    Ready(Arc<dyn SourceAdapter>),
    /// The adapter could not be built, usually for a missing credential.
    Unavailable(SourceError),
}

pub struct Aggregator {
    registry: BTreeMap<SourceId, Registration>,
    default_timeout: Duration,
    timeouts: BTreeMap<SourceId, Duration>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            registry: BTreeMap::new(),
            default_timeout: DEFAULT_SOURCE_TIMEOUT,
            timeouts: BTreeMap::new(),
        }
    }

    /// Register an adapter under its own id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.registry
            .insert(adapter.id(), Registration::Ready(adapter));
        self
    }

    /// Register a source that resolves to `error` whenever it is selected.
    pub fn register_unavailable(&mut self, source: SourceId, error: SourceError) -> &mut Self {
        self.registry
            .insert(source, Registration::Unavailable(error));
        self
    }

    pub fn with_default_timeout(mut self, limit: Duration) -> Self {
        self.default_timeout = limit;
        self
    }

    #[allow(dead_code)] // Per-source override, not exposed on the CLI yet
    pub fn with_source_timeout(mut self, source: SourceId, limit: Duration) -> Self {
        self.timeouts.insert(source, limit);
        self
    }

    pub fn timeout_for(&self, source: SourceId) -> Duration {
        self.timeouts
            .get(&source)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Whether `source` has a usable adapter.
    pub fn is_available(&self, source: SourceId) -> bool {
        matches!(self.registry.get(&source), Some(Registration::Ready(_)))
    }

    /// Run every selected source and return once all of them resolved.
    #[allow(dead_code)] // Callers go through run_all_with_progress
    pub async fn run_all(
        &self,
        descriptor: &BusinessDescriptor,
        selected: &[SourceId],
        options: &SourceOptions,
    ) -> AggregationBundle {
        self.run_all_with_progress(descriptor, selected, options, |_, _, _| {})
            .await
    }

    /// Like [`Aggregator::run_all`], calling `on_resolved` once per source
    /// with its result and the run state after recording it.
    pub async fn run_all_with_progress<F>(
        &self,
        descriptor: &BusinessDescriptor,
        selected: &[SourceId],
        options: &SourceOptions,
        mut on_resolved: F,
    ) -> AggregationBundle
    where
        F: FnMut(SourceId, &SourceResult, &AggregationState),
    {
        let mut bundle = AggregationBundle::new(descriptor.clone(), Utc::now());
        let mut state = AggregationState::NotStarted;
        debug!("Aggregation for '{}' is {}", descriptor.name(), state);

        let requested: BTreeSet<SourceId> = selected.iter().copied().collect();
        if requested.len() < selected.len() {
            debug!(
                "Ignoring {} duplicate source selections",
                selected.len() - requested.len()
            );
        }

        if requested.is_empty() {
            state = AggregationState::Completed;
            info!("No sources selected; aggregation {}", state);
            return bundle;
        }

        state = AggregationState::Running {
            pending: requested.clone(),
        };
        info!("Aggregation {}", state);

        let mut in_flight: FuturesUnordered<_> = requested
            .iter()
            .map(|&source| async move { (source, self.invoke(source, descriptor, options).await) })
            .collect();

        while let Some((source, result)) = in_flight.next().await {
            log_resolution(source, &result);
            bundle.insert(source, result);

            if let AggregationState::Running { pending } = &mut state {
                pending.remove(&source);
                if pending.is_empty() {
                    state = AggregationState::Completed;
                }
            }
            debug!("Aggregation {}", state);

            if let Some(result) = bundle.get(source) {
                on_resolved(source, result, &state);
            }
        }

        info!(
            "Aggregation completed: {} sources, {} failed",
            bundle.len(),
            bundle.failures().count()
        );
        bundle
    }

    async fn invoke(
        &self,
        source: SourceId,
        descriptor: &BusinessDescriptor,
        options: &SourceOptions,
    ) -> SourceResult {
        let adapter = match self.registry.get(&source) {
            Some(Registration::Ready(adapter)) => Arc::clone(adapter),
            Some(Registration::Unavailable(error)) => return SourceResult::Failure(error.clone()),
            None => {
                return SourceResult::Failure(SourceError::Configuration(format!(
                    "no adapter registered for {}",
                    source
                )))
            }
        };

        let limit = self.timeout_for(source);
        debug!("Invoking {} (timeout {:?})", source, limit);

        let call = AssertUnwindSafe(adapter.fetch(descriptor, options)).catch_unwind();
        match timeout(limit, call).await {
            Err(_) => SourceResult::Failure(SourceError::Timeout(limit)),
            Ok(Err(panic)) => SourceResult::Failure(SourceError::upstream(
                "panic",
                format!("adapter panicked: {}", panic_message(panic.as_ref())),
            )),
            Ok(Ok(Ok(Fetched::Complete(payload)))) => SourceResult::Success(payload),
            Ok(Ok(Ok(Fetched::Partial { payload, reason }))) => {
                SourceResult::Degraded { payload, reason }
            }
            Ok(Ok(Err(SourceError::NotFound(message)))) => {
                debug!("{} found nothing: {}", source, message);
                SourceResult::Success(SourcePayload::empty_for(source))
            }
            Ok(Ok(Err(error))) => SourceResult::Failure(error),
        }
    }
}

fn log_resolution(source: SourceId, result: &SourceResult) {
    match result {
        SourceResult::Success(payload) => {
            info!("{} resolved with {} records", source, payload.record_count())
        }
        SourceResult::Degraded { payload, reason } => warn!(
            "{} resolved with {} records (degraded: {})",
            source,
            payload.record_count(),
            reason
        ),
        SourceResult::Failure(error) => warn!("{} failed: {}", source, error),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Review, ReviewsPayload, SourceStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Return(Fetched),
        Fail(SourceError),
        Sleep(Duration),
        Panic,
    }

    struct StubAdapter {
        id: SourceId,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubAdapter {
        fn new(id: SourceId, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn id(&self) -> SourceId {
            self.id
        }

        async fn fetch(
            &self,
            _descriptor: &BusinessDescriptor,
            _options: &SourceOptions,
        ) -> Result<Fetched, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Return(fetched) => Ok(fetched.clone()),
                Behavior::Fail(error) => Err(error.clone()),
                Behavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(SourcePayload::empty_for(self.id).into())
                }
                Behavior::Panic => panic!("adapter bug"),
            }
        }
    }

    fn descriptor() -> BusinessDescriptor {
        BusinessDescriptor::new(
            "Big Y World Class Market",
            Some("Grocery Store".to_string()),
            "Springfield, MA",
            None,
        )
        .unwrap()
    }

    fn reviews(count: usize) -> Fetched {
        let reviews = (0..count)
            .map(|i| Review {
                business_name: "Big Y World Class Market".to_string(),
                author: format!("Reviewer {}", i),
                rating: Some(5.0),
                text: "Great".to_string(),
                time: None,
                relative_time: String::new(),
            })
            .collect();
        SourcePayload::Reviews(ReviewsPayload {
            place: None,
            reviews,
        })
        .into()
    }

    #[tokio::test]
    async fn test_all_sources_resolve_independently() {
        let mut aggregator = Aggregator::new();
        aggregator
            .register(StubAdapter::new(SourceId::Reviews, Behavior::Return(reviews(12))))
            .register(StubAdapter::new(
                SourceId::Loans,
                Behavior::Fail(SourceError::transport("cannot connect")),
            ))
            .register(StubAdapter::new(
                SourceId::Research,
                Behavior::Return(SourcePayload::empty_for(SourceId::Research).into()),
            ));

        let bundle = aggregator
            .run_all(
                &descriptor(),
                &[SourceId::Reviews, SourceId::Loans, SourceId::Research],
                &SourceOptions::default(),
            )
            .await;

        assert_eq!(bundle.len(), 3);
        assert_eq!(
            bundle.get(SourceId::Reviews).and_then(|r| r.payload()).map(|p| p.record_count()),
            Some(12)
        );
        assert_eq!(bundle.status(SourceId::Loans), SourceStatus::Failed);
        assert_eq!(
            bundle.get(SourceId::Loans).and_then(|r| r.error()).map(|e| e.kind()),
            Some(ErrorKind::Upstream)
        );
        assert_eq!(bundle.status(SourceId::Research), SourceStatus::Success);
        assert_eq!(bundle.status(SourceId::Competitors), SourceStatus::Skipped);
    }

    #[tokio::test]
    async fn test_empty_selection_completes_immediately() {
        let adapter = StubAdapter::new(SourceId::Reviews, Behavior::Return(reviews(1)));
        let mut aggregator = Aggregator::new();
        aggregator.register(adapter.clone());

        let mut events = 0;
        let bundle = aggregator
            .run_all_with_progress(&descriptor(), &[], &SourceOptions::default(), |_, _, _| {
                events += 1
            })
            .await;

        assert!(bundle.is_empty());
        assert_eq!(events, 0);
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_selection_invokes_once() {
        let adapter = StubAdapter::new(SourceId::Reviews, Behavior::Return(reviews(2)));
        let mut aggregator = Aggregator::new();
        aggregator.register(adapter.clone());

        let bundle = aggregator
            .run_all(
                &descriptor(),
                &[SourceId::Reviews, SourceId::Reviews],
                &SourceOptions::default(),
            )
            .await;

        assert_eq!(bundle.len(), 1);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_becomes_empty_success() {
        let mut aggregator = Aggregator::new();
        aggregator.register(StubAdapter::new(
            SourceId::Competitors,
            Behavior::Fail(SourceError::NotFound("ZERO_RESULTS".to_string())),
        ));

        let bundle = aggregator
            .run_all(&descriptor(), &[SourceId::Competitors], &SourceOptions::default())
            .await;

        match bundle.get(SourceId::Competitors) {
            Some(SourceResult::Success(payload)) => {
                assert_eq!(payload.source(), SourceId::Competitors);
                assert!(payload.is_empty());
            }
            other => panic!("expected empty success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_fetch_is_degraded() {
        let mut aggregator = Aggregator::new();
        aggregator.register(StubAdapter::new(
            SourceId::Reviews,
            Behavior::Return(Fetched::Partial {
                payload: SourcePayload::empty_for(SourceId::Reviews),
                reason: "second page failed".to_string(),
            }),
        ));

        let bundle = aggregator
            .run_all(&descriptor(), &[SourceId::Reviews], &SourceOptions::default())
            .await;

        assert_eq!(bundle.status(SourceId::Reviews), SourceStatus::Degraded);
        assert!(bundle.failures().next().is_none());
    }

    #[tokio::test]
    async fn test_slow_source_times_out_without_blocking_others() {
        let mut aggregator = Aggregator::new();
        aggregator
            .register(StubAdapter::new(
                SourceId::Research,
                Behavior::Sleep(Duration::from_secs(30)),
            ))
            .register(StubAdapter::new(SourceId::Reviews, Behavior::Return(reviews(3))));
        let aggregator = aggregator
            .with_default_timeout(Duration::from_secs(10))
            .with_source_timeout(SourceId::Research, Duration::from_millis(50));

        let started = std::time::Instant::now();
        let bundle = aggregator
            .run_all(
                &descriptor(),
                &[SourceId::Research, SourceId::Reviews],
                &SourceOptions::default(),
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            bundle.get(SourceId::Research).and_then(|r| r.error()),
            Some(&SourceError::Timeout(Duration::from_millis(50)))
        );
        assert_eq!(bundle.status(SourceId::Reviews), SourceStatus::Success);
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_isolated() {
        let mut aggregator = Aggregator::new();
        aggregator
            .register(StubAdapter::new(SourceId::Loans, Behavior::Panic))
            .register(StubAdapter::new(SourceId::Reviews, Behavior::Return(reviews(1))));

        let bundle = aggregator
            .run_all(
                &descriptor(),
                &[SourceId::Loans, SourceId::Reviews],
                &SourceOptions::default(),
            )
            .await;

        let error = bundle.get(SourceId::Loans).and_then(|r| r.error()).unwrap();
        assert_eq!(error.kind(), ErrorKind::Upstream);
        assert!(error.to_string().contains("adapter bug"));
        assert_eq!(bundle.status(SourceId::Reviews), SourceStatus::Success);
    }

    #[tokio::test]
    async fn test_unavailable_and_unregistered_sources_fail_with_configuration() {
        let mut aggregator = Aggregator::new();
        aggregator.register_unavailable(
            SourceId::Research,
            SourceError::Configuration("OPENAI_API_KEY is required".to_string()),
        );
        assert!(!aggregator.is_available(SourceId::Research));

        let bundle = aggregator
            .run_all(
                &descriptor(),
                &[SourceId::Research, SourceId::Competitors],
                &SourceOptions::default(),
            )
            .await;

        for source in [SourceId::Research, SourceId::Competitors] {
            assert_eq!(
                bundle.get(source).and_then(|r| r.error()).map(|e| e.kind()),
                Some(ErrorKind::Configuration)
            );
        }
    }

    #[tokio::test]
    async fn test_progress_reports_every_source_and_completion() {
        let mut aggregator = Aggregator::new();
        for source in SourceId::ALL {
            aggregator.register(StubAdapter::new(
                source,
                Behavior::Return(SourcePayload::empty_for(source).into()),
            ));
        }

        let mut seen = Vec::new();
        let mut last_state = AggregationState::NotStarted;
        let bundle = aggregator
            .run_all_with_progress(
                &descriptor(),
                &SourceId::ALL,
                &SourceOptions::default(),
                |source, _, state| {
                    seen.push(source);
                    last_state = state.clone();
                },
            )
            .await;

        seen.sort();
        assert_eq!(seen, SourceId::ALL.to_vec());
        assert_eq!(last_state, AggregationState::Completed);
        assert_eq!(bundle.len(), 4);
    }

    #[test]
    fn test_state_display() {
        let state = AggregationState::Running {
            pending: [SourceId::Loans, SourceId::Reviews].into_iter().collect(),
        };
        assert_eq!(state.to_string(), "running (pending: reviews, loans)");
    }
}
