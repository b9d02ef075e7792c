//! Trendsmith Aggregator
//!
//! Pure merge of the sandbox's extracted fields, search hits and the topic
//! into a [`Summary`] whose shape does not depend on which sources answered.

mod aggregate;
mod error;
mod summary;

pub use aggregate::aggregate;
pub use error::AggregationFailure;
pub use summary::{Provenance, Summary, UNKNOWN};
