//! Request-scoped query cache addressed by composite keys.

pub mod cache;
pub mod key;

pub use cache::{CacheState, QueryCache, QueryOutcome, QueryPolicy};
pub use key::QueryKey;
