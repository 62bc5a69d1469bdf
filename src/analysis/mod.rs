//! Aggregation of the selected sources into one bundle.

pub mod aggregator;

pub use aggregator::{AggregationState, Aggregator};
