//! Query shapes exchanged with the serving layer, and the page/sort arithmetic.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rules::{normalize, Rule, RuleSet};
use crate::{FilmlistError, FilmlistResult, ShowRow};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Title,
    Channel,
    Start,
    Duration,
    Topic,
}

impl SortField {
    pub const ALLOWED: &'static [&'static str] = &["title", "channel", "start", "duration", "topic"];
}

impl FromStr for SortField {
    type Err = FilmlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(SortField::Title),
            "channel" => Ok(SortField::Channel),
            "start" => Ok(SortField::Start),
            "duration" => Ok(SortField::Duration),
            "topic" => Ok(SortField::Topic),
            other => Err(FilmlistError::InvalidArgument(format!(
                "sort_field must be one of {:?}, got {other:?}",
                SortField::ALLOWED
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortDirection {
    type Err = FilmlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ascending" | "asc" | "^" => Ok(SortDirection::Ascending),
            "descending" | "desc" | "v" => Ok(SortDirection::Descending),
            other => Err(FilmlistError::InvalidArgument(format!(
                "sort_direction must be ascending or descending, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Sort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Sort {
    pub fn compare(&self, a: &ShowRow, b: &ShowRow) -> Ordering {
        let ord = match self.field {
            SortField::Title => a.title.cmp(&b.title),
            SortField::Channel => a.channel.cmp(&b.channel),
            SortField::Start => a.start.cmp(&b.start),
            SortField::Duration => a.duration.cmp(&b.duration),
            SortField::Topic => a.topic.cmp(&b.topic),
        };
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// Request body as sent by the serving layer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryParams {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_direction: Option<String>,
}

fn default_page() -> i64 { 1 }
fn default_limit() -> i64 { 10 }

impl Default for QueryParams {
    fn default() -> Self {
        Self { rules: Vec::new(), page: default_page(), limit: default_limit(), sort_field: None, sort_direction: None }
    }
}

/// Validated, normalized query. Two requests that differ only in rule order compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRequest {
    rules: RuleSet,
    page: u32,
    page_size: u32,
    sort: Option<Sort>,
}

impl QueryRequest {
    pub fn new(rules: &[Rule], page: i64, page_size: i64, sort: Option<Sort>) -> FilmlistResult<Self> {
        if page < 1 {
            return Err(FilmlistError::InvalidArgument(format!("page cannot be below 1, got {page}")));
        }
        if page_size < 1 {
            return Err(FilmlistError::InvalidArgument(format!("limit cannot be below 1, got {page_size}")));
        }
        let page = u32::try_from(page).map_err(|_| FilmlistError::InvalidArgument(format!("page out of range: {page}")))?;
        let page_size = u32::try_from(page_size)
            .map_err(|_| FilmlistError::InvalidArgument(format!("limit out of range: {page_size}")))?;
        Ok(Self { rules: normalize(rules), page, page_size, sort })
    }

    pub fn rules(&self) -> &RuleSet { &self.rules }
    pub fn page(&self) -> u32 { self.page }
    pub fn page_size(&self) -> u32 { self.page_size }
    pub fn sort(&self) -> Option<Sort> { self.sort }

    /// Sort the whole filtered set, then cut the requested page out of it.
    pub fn view(&self, rows: &[ShowRow]) -> ResultPage {
        let mut refs: Vec<&ShowRow> = rows.iter().collect();
        if let Some(sort) = self.sort {
            refs.sort_by(|a, b| sort.compare(a, b));
        }
        ResultPage::paginate(&refs, self.page, self.page_size)
    }
}

impl TryFrom<QueryParams> for QueryRequest {
    type Error = FilmlistError;

    fn try_from(p: QueryParams) -> Result<Self, Self::Error> {
        let field = p.sort_field.as_deref().filter(|s| !s.is_empty()).map(SortField::from_str).transpose()?;
        let direction = p
            .sort_direction
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(SortDirection::from_str)
            .transpose()?;
        // A direction without a field has nothing to order by.
        let sort = field.map(|field| Sort { field, direction: direction.unwrap_or_default() });
        QueryRequest::new(&p.rules, p.page, p.limit, sort)
    }
}

/// One page of a (sorted) result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultPage {
    #[serde(rename = "result")]
    pub items: Vec<ShowRow>,
    pub page: u32,
    pub last_page: u32,
    pub item_count: usize,
}

impl ResultPage {
    /// Pages are 1-based. A page past the end is clamped to the last page; an empty set has
    /// one empty page.
    pub fn paginate(rows: &[&ShowRow], page: u32, page_size: u32) -> Self {
        let size = page_size.max(1) as usize;
        let item_count = rows.len();
        let last_page = item_count.div_ceil(size).max(1);
        let last_page = u32::try_from(last_page).unwrap_or(u32::MAX);
        let page = page.clamp(1, last_page);
        let from = (page as usize - 1).saturating_mul(size).min(item_count);
        let to = from.saturating_add(size).min(item_count);
        let items = rows[from..to].iter().map(|r| (*r).clone()).collect();
        Self { items, page, last_page, item_count }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Refreshing,
    Ready,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Loading => "loading",
            Status::Refreshing => "refreshing",
            Status::Ready => "ready",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BusyReason {
    Loading,
    Refreshing,
    Contended,
}

impl BusyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BusyReason::Loading => "loading",
            BusyReason::Refreshing => "refreshing",
            BusyReason::Contended => "contended",
        }
    }
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Serializes as `{"busy": reason}` or as the page body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum QueryOutcome {
    Busy { busy: BusyReason },
    Page(Arc<ResultPage>),
}

impl QueryOutcome {
    pub fn busy(reason: BusyReason) -> Self { QueryOutcome::Busy { busy: reason } }

    pub fn page(&self) -> Option<&Arc<ResultPage>> {
        match self {
            QueryOutcome::Page(p) => Some(p),
            QueryOutcome::Busy { .. } => None,
        }
    }

    pub fn busy_reason(&self) -> Option<BusyReason> {
        match self {
            QueryOutcome::Busy { busy } => Some(*busy),
            QueryOutcome::Page(_) => None,
        }
    }
}

/// Result of a single-flight maintenance call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Another call already holds the flag; nothing was started.
    AlreadyRunning,
    /// Nothing to do, e.g. a refresh with no dataset installed.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(titles: &[&str]) -> Vec<ShowRow> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| ShowRow { id: i as i64, title: t.to_string(), ..Default::default() })
            .collect()
    }

    fn titles(page: &ResultPage) -> Vec<&str> { page.items.iter().map(|r| r.title.as_str()).collect() }

    #[test]
    fn sorts_before_paginating() {
        let rows = titled(&["B", "A", "C"]);
        let asc = Sort { field: SortField::Title, direction: SortDirection::Ascending };
        let desc = Sort { field: SortField::Title, direction: SortDirection::Descending };
        let page = QueryRequest::new(&[], 1, 2, Some(asc)).unwrap().view(&rows);
        assert_eq!(titles(&page), ["A", "B"]);
        assert_eq!((page.item_count, page.last_page), (3, 2));
        let page = QueryRequest::new(&[], 1, 2, Some(desc)).unwrap().view(&rows);
        assert_eq!(titles(&page), ["C", "B"]);
        let page = QueryRequest::new(&[], 2, 2, Some(desc)).unwrap().view(&rows);
        assert_eq!(titles(&page), ["A"]);
    }

    #[test]
    fn unsorted_keeps_storage_order_and_clamps() {
        let rows = titled(&["B", "A", "C"]);
        let page = QueryRequest::new(&[], 9, 2, None).unwrap().view(&rows);
        assert_eq!(page.page, 2);
        assert_eq!(titles(&page), ["C"]);
        let empty = QueryRequest::new(&[], 1, 5, None).unwrap().view(&[]);
        assert_eq!((empty.page, empty.last_page, empty.item_count), (1, 1, 0));
        assert!(empty.items.is_empty());
    }

    #[test]
    fn params_validation() {
        let bad_field = QueryParams { sort_field: Some("bogus".into()), ..Default::default() };
        assert!(matches!(QueryRequest::try_from(bad_field), Err(FilmlistError::InvalidArgument(_))));
        let bad_dir = QueryParams { sort_field: Some("title".into()), sort_direction: Some("up".into()), ..Default::default() };
        assert!(matches!(QueryRequest::try_from(bad_dir), Err(FilmlistError::InvalidArgument(_))));
        let bad_page = QueryParams { page: 0, ..Default::default() };
        assert!(matches!(QueryRequest::try_from(bad_page), Err(FilmlistError::InvalidArgument(_))));

        let arrows = QueryParams { sort_field: Some("start".into()), sort_direction: Some("v".into()), ..Default::default() };
        let req = QueryRequest::try_from(arrows).unwrap();
        assert_eq!(req.sort(), Some(Sort { field: SortField::Start, direction: SortDirection::Descending }));
        let dir_only = QueryParams { sort_direction: Some("descending".into()), ..Default::default() };
        assert_eq!(QueryRequest::try_from(dir_only).unwrap().sort(), None);
    }

    #[test]
    fn request_equality_ignores_rule_order() {
        let a: Rule = "title=Wart".parse().unwrap();
        let b: Rule = "channel=ARD".parse().unwrap();
        let r1 = QueryRequest::new(&[a.clone(), b.clone()], 1, 10, None).unwrap();
        let r2 = QueryRequest::new(&[b, a], 1, 10, None).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn outcome_wire_shapes() {
        let busy = serde_json::to_value(QueryOutcome::busy(BusyReason::Contended)).unwrap();
        assert_eq!(busy, serde_json::json!({"busy": "contended"}));
        let page = ResultPage { items: vec![], page: 1, last_page: 1, item_count: 0 };
        let v = serde_json::to_value(QueryOutcome::Page(Arc::new(page))).unwrap();
        assert_eq!(v, serde_json::json!({"result": [], "page": 1, "last_page": 1, "item_count": 0}));
    }

    #[test]
    fn params_defaults_from_json() {
        let p: QueryParams = serde_json::from_str(r#"{"rules": ["title=Wart"]}"#).unwrap();
        assert_eq!((p.page, p.limit), (1, 10));
        assert_eq!(p.rules.len(), 1);
    }
}
