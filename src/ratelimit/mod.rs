//! Rate limiting logic and state management.

mod bucket;
mod keys;
mod limiter;
mod request;
mod store;

pub use bucket::TokenBucket;
pub use keys::{Dimension, HeaderMatch, KeyExtractor, SkipPredicate};
pub use limiter::{Decision, Limiter, Rejection, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
pub use request::RequestDescriptor;
pub use store::{Admission, BucketStore};
