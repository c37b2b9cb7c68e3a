//! Page fetching under retry and concurrency control.

pub mod governor;
pub mod paginate;
pub mod retry;

pub use governor::{Governor, RequestPermit};
pub use paginate::{FetchOutcome, Paginator};
pub use retry::{RetryPolicy, RetryState};
