//! Trendsmith HTTP capability
//!
//! Every outbound request made on behalf of the pipeline goes through an
//! [`HttpPolicy`]: scheme and host allow-list, SSRF guard on the target and
//! on every redirect hop, a client timeout and a response-size cap.
//!
//! [`HttpFetcher`] is the async implementation of [`PageFetcher`] used by the
//! structure analyzer. [`BlockingFetcher`] serves sandboxed code, which runs
//! on a dedicated OS thread outside the async runtime.

mod blocking;
mod error;
mod fetch;
mod policy;

pub use blocking::BlockingFetcher;
pub use error::HttpError;
pub use fetch::{FetchedPage, HttpFetcher, PageFetcher};
pub use policy::{DEFAULT_USER_AGENT, HttpPolicy, is_private_ip, is_ssrf_target};
