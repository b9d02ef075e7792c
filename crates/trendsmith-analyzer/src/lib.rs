//! Trendsmith Structure Analyzer
//!
//! Fetches a page through the HTTP capability and reduces it to a compact
//! [`StructureDescriptor`]: a `tag#id.class` skeleton plus the selector
//! probes and metadata flags a code generator needs. The descriptor is size
//! capped and carries no page text beyond the title.
//!
//! Failures are soft and typed ([`AnalysisFailure`]); the engine decides
//! whether to retry or degrade.

mod analyzer;
mod descriptor;
mod error;
mod reduce;

pub use analyzer::{Analysis, StructureAnalyzer};
pub use descriptor::{StructureDescriptor, SuggestedApproach};
pub use error::AnalysisFailure;
pub use reduce::reduce;
