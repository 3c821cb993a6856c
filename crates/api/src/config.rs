//! Coordinator tuning knobs.

#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a query waits for the access lock before answering busy.
    pub lock_timeout: Duration,
    pub refresh_max_age_hours: u32,
    /// Most rows the store is asked for per rule set, independent of page size. Sorting and
    /// paging happen on this capped set.
    pub filter_cap: usize,
    pub filter_cache_capacity: usize,
    pub page_cache_capacity: usize,
    pub worker_queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(1000),
            refresh_max_age_hours: 3,
            filter_cap: 10_000,
            filter_cache_capacity: 32 * 1024,
            page_cache_capacity: 32 * 1024,
            worker_queue_capacity: 1024,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by `FILMLIST_*` environment variables; unparsable values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            lock_timeout: Duration::from_millis(env_or("FILMLIST_LOCK_TIMEOUT_MS", d.lock_timeout.as_millis() as u64)),
            refresh_max_age_hours: env_or("FILMLIST_REFRESH_MAX_AGE_HOURS", d.refresh_max_age_hours),
            filter_cap: env_or("FILMLIST_FILTER_CAP", d.filter_cap),
            filter_cache_capacity: env_or("FILMLIST_FILTER_CACHE_CAP", d.filter_cache_capacity),
            page_cache_capacity: env_or("FILMLIST_PAGE_CACHE_CAP", d.page_cache_capacity),
            worker_queue_capacity: env_or("FILMLIST_WORKER_QUEUE_CAP", d.worker_queue_capacity),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        std::env::set_var("FILMLIST_FILTER_CAP", "250");
        std::env::set_var("FILMLIST_LOCK_TIMEOUT_MS", "not-a-number");
        let c = CoordinatorConfig::from_env();
        std::env::remove_var("FILMLIST_FILTER_CAP");
        std::env::remove_var("FILMLIST_LOCK_TIMEOUT_MS");
        assert_eq!(c.filter_cap, 250);
        assert_eq!(c.lock_timeout, Duration::from_secs(1));
        assert_eq!(c.page_cache_capacity, 32 * 1024);
    }
}
