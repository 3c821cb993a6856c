//! Compiled form of a rule set, evaluated row by row.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use filmlist_core::rules::parse_start;
use filmlist_core::{Rule, RuleOp, ShowRow};
use regex::{Regex, RegexBuilder};

enum Cond {
    Text { field: String, re: Regex, negate: bool },
    /// Length bound in seconds.
    Duration { secs: i64, greater: bool },
    Start { ts: i64, greater: bool },
}

pub struct RuleMatcher {
    conds: Vec<Cond>,
}

impl RuleMatcher {
    pub fn compile(rules: &[Rule]) -> Result<Self> {
        let mut conds = Vec::with_capacity(rules.len());
        for rule in rules {
            let greater = rule.operator == RuleOp::Greater;
            let cond = match rule.field.as_str() {
                "duration" => {
                    let minutes: i64 = rule.value.trim().parse().with_context(|| format!("rule {rule}"))?;
                    Cond::Duration { secs: minutes.saturating_mul(60), greater }
                }
                "start" => {
                    let ts = parse_start(&rule.value).ok_or_else(|| anyhow!("rule {rule}: unreadable start"))?;
                    Cond::Start { ts, greater }
                }
                field => {
                    let re = RegexBuilder::new(&rule.value)
                        .case_insensitive(true)
                        .build()
                        .with_context(|| format!("rule {rule}"))?;
                    Cond::Text { field: field.to_string(), re, negate: rule.operator == RuleOp::NotMatches }
                }
            };
            conds.push(cond);
        }
        Ok(Self { conds })
    }

    /// True when the row satisfies every rule.
    pub fn matches(&self, row: &ShowRow) -> bool {
        self.conds.iter().all(|c| match c {
            Cond::Text { field, re, negate } => {
                let hit = row.text(field).is_some_and(|v| re.is_match(v));
                hit != *negate
            }
            Cond::Duration { secs, greater } => {
                if *greater { row.duration > *secs } else { row.duration < *secs }
            }
            Cond::Start { ts, greater } => {
                if *greater { row.start > *ts } else { row.start < *ts }
            }
        })
    }
}
