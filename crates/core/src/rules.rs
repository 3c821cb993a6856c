//! Filter rules: `field` + operator + `value`, e.g. `title=Wart` or `duration+30`.
//!
//! Rules are conjunctive, so a rule set is normalized by sorting and de-duplicating before it
//! is used as a cache key.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::FilmlistError;

pub type RuleSet = SmallVec<[Rule; 4]>;

const TEXT_FIELDS: &[&str] = &["title", "channel", "topic", "description", "url"];
const ORDERED_FIELDS: &[&str] = &["duration", "start"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleOp {
    /// Case-insensitive regex search.
    #[serde(rename = "=", alias = "matches")]
    Matches,
    #[serde(rename = "!=", alias = "not_matches")]
    NotMatches,
    #[serde(rename = "+", alias = "greater")]
    Greater,
    #[serde(rename = "-", alias = "less")]
    Less,
}

impl RuleOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RuleOp::Matches => "=",
            RuleOp::NotMatches => "!=",
            RuleOp::Greater => "+",
            RuleOp::Less => "-",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "RuleRepr")]
pub struct Rule {
    pub field: String,
    pub operator: RuleOp,
    pub value: String,
}

/// Accepted wire forms: `"title=Wart"` or `{"field": .., "operator": .., "value": ..}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleRepr {
    Text(String),
    Parts { field: String, operator: RuleOp, value: String },
}

impl TryFrom<RuleRepr> for Rule {
    type Error = FilmlistError;

    fn try_from(repr: RuleRepr) -> Result<Self, Self::Error> {
        match repr {
            RuleRepr::Text(s) => s.parse(),
            RuleRepr::Parts { field, operator, value } => Rule::new(&field, operator, &value),
        }
    }
}

impl Rule {
    pub fn new(field: &str, operator: RuleOp, value: &str) -> Result<Self, FilmlistError> {
        let field = field.trim().to_ascii_lowercase();
        let text = TEXT_FIELDS.contains(&field.as_str());
        let ordered = ORDERED_FIELDS.contains(&field.as_str());
        if !text && !ordered {
            return Err(FilmlistError::InvalidArgument(format!("unknown rule field: {field:?}")));
        }
        let op_fits = match operator {
            RuleOp::Matches | RuleOp::NotMatches => text,
            RuleOp::Greater | RuleOp::Less => ordered,
        };
        if !op_fits {
            return Err(FilmlistError::InvalidArgument(format!(
                "operator {:?} not supported for field {field:?}",
                operator.symbol()
            )));
        }
        if value.is_empty() {
            return Err(FilmlistError::InvalidArgument(format!("rule on {field:?} has an empty value")));
        }
        match field.as_str() {
            "duration" => {
                value.trim().parse::<i64>().map_err(|_| {
                    FilmlistError::InvalidArgument(format!("duration rule expects minutes, got {value:?}"))
                })?;
            }
            "start" => {
                parse_start(value).ok_or_else(|| {
                    FilmlistError::InvalidArgument(format!("start rule expects YYYY-MM-DD or RFC 3339, got {value:?}"))
                })?;
            }
            _ => {
                regex::RegexBuilder::new(value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| FilmlistError::InvalidArgument(format!("bad pattern in {field} rule: {e}")))?;
            }
        }
        Ok(Self { field, operator, value: value.to_string() })
    }
}

impl FromStr for Rule {
    type Err = FilmlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .ok_or_else(|| FilmlistError::InvalidArgument(format!("rule without operator: {s:?}")))?;
        let (field, rest) = s.split_at(split);
        let (operator, value) = if let Some(v) = rest.strip_prefix("!=") {
            (RuleOp::NotMatches, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (RuleOp::Matches, v)
        } else if let Some(v) = rest.strip_prefix('+') {
            (RuleOp::Greater, v)
        } else if let Some(v) = rest.strip_prefix('-') {
            (RuleOp::Less, v)
        } else {
            return Err(FilmlistError::InvalidArgument(format!("unknown rule operator in {s:?}")));
        };
        Rule::new(field, operator, value)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.field, self.operator.symbol(), self.value)
    }
}

/// Seconds since epoch for a `start` rule value: a UTC date (midnight) or an RFC 3339 timestamp.
pub fn parse_start(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    chrono::DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.timestamp())
}

/// Stable, order-independent form of a rule set.
pub fn normalize(rules: &[Rule]) -> RuleSet {
    let mut out: RuleSet = rules.iter().cloned().collect();
    out.sort();
    out.dedup();
    out
}
