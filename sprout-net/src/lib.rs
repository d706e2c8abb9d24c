// sprout-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{fetch_with_retry, ArtifactFetcher, FetchAttemptError, HttpFetcher, RetryPolicy};
pub use validation::{url_file_name, validate_url};
