//! Trendsmith search capability
//!
//! `search(query) -> [{title, snippet, url}]` behind [`SearchProvider`], with a
//! [`TavilyClient`] implementation.

mod error;
mod provider;
mod tavily;

pub use error::SearchError;
pub use provider::{SearchHit, SearchProvider};
pub use tavily::{TavilyClient, parse_tavily_response};
