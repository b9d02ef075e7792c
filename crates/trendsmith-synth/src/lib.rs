//! Trendsmith Code Synthesizer
//!
//! Asks the text generation capability for a Lua extractor that fits a
//! [`StructureDescriptor`](trendsmith_analyzer::StructureDescriptor), then
//! runs the static allow-list [`check`] before the candidate may reach the
//! sandbox. Rejected candidates are regenerated with the rejection reasons as
//! extra instruction.
//!
//! The check is a filter, not the boundary. The sandbox enforces the same
//! allow-list at runtime.

mod check;
mod error;
mod prompt;
mod synthesizer;

pub use check::{MAX_SOURCE_BYTES, check};
pub use error::SynthesisFailure;
pub use prompt::extract_code;
pub use synthesizer::Synthesizer;
