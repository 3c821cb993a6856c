//! Filmlist core types: show rows, filter rules, query shapes and the data store contract.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod query;
pub mod rules;

pub use query::{
    BusyReason, QueryOutcome, QueryParams, QueryRequest, ResultPage, RunOutcome, Sort,
    SortDirection, SortField, Status,
};
pub use rules::{Rule, RuleOp, RuleSet};

/// One broadcast entry of the show list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ShowRow {
    pub id: i64,
    pub channel: String,
    pub topic: String,
    pub title: String,
    pub description: String,
    /// Broadcast start, seconds since epoch (UTC).
    pub start: i64,
    /// Length in seconds.
    pub duration: i64,
    pub url: String,
}

impl ShowRow {
    /// Text value of a named field, for rule matching.
    pub fn text(&self, field: &str) -> Option<&str> {
        match field {
            "title" => Some(&self.title),
            "channel" => Some(&self.channel),
            "topic" => Some(&self.topic),
            "description" => Some(&self.description),
            "url" => Some(&self.url),
            _ => None,
        }
    }
}

/// API errors surfaced to the serving layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum FilmlistError {
    #[error("invalid_argument: {0}")]
    InvalidArgument(String),
    #[error("store_failure: {0}")]
    StoreFailure(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type FilmlistResult<T> = Result<T, FilmlistError>;

/// What a staleness check did to the dataset.
#[derive(Debug)]
pub enum RefreshOutcome<H> {
    /// Nothing changed; cached answers stay valid.
    Unchanged,
    /// The handle was updated in place.
    Updated,
    /// A fresh handle replaces the current one.
    Replaced(H),
}

impl<H> RefreshOutcome<H> {
    pub fn changed(&self) -> bool {
        !matches!(self, RefreshOutcome::Unchanged)
    }
}

/// Blocking access to the dataset.
///
/// Implementations are not required to be reentrant: callers guarantee that no two calls
/// run at the same time.
pub trait DataStore: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Load the dataset from storage. May be slow.
    fn build(&self) -> anyhow::Result<Self::Handle>;

    /// Rows matching every rule, at most `limit` of them, in storage order.
    fn filter(&self, handle: &Self::Handle, rules: &[Rule], limit: usize) -> anyhow::Result<Vec<ShowRow>>;

    /// Reload or update the dataset when it is older than `max_age_hours`.
    fn refresh_if_stale(
        &self,
        handle: &Self::Handle,
        max_age_hours: u32,
    ) -> anyhow::Result<RefreshOutcome<Self::Handle>>;
}

pub mod prelude {
    pub use super::{
        BusyReason, DataStore, FilmlistError, FilmlistResult, QueryOutcome, QueryParams,
        QueryRequest, RefreshOutcome, ResultPage, Rule, RuleOp, RunOutcome, ShowRow, Sort,
        SortDirection, SortField, Status,
    };
}
