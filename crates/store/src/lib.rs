//! Filmlist store: the pieces the coordinator is assembled from.
//!
//! - [`Lifecycle`]: loading/refreshing single-flight flags
//! - [`Worker`]: the one thread all blocking data store calls run on
//! - [`QueryCache`]: bounded LRU caches for filter results and result pages

#![forbid(unsafe_code)]

pub mod cache;
pub mod lifecycle;
pub mod worker;

pub use cache::{FilterKey, LruCache, QueryCache, QueryKey};
pub use lifecycle::{Flag, FlagGuard, Lifecycle};
pub use worker::{Worker, WorkerError};
