//! Retention rule evaluation.
//!
//! A row is deleted when its representative column breaks the configured
//! limits: a remaining TTL above the maximum, or a write time before the
//! minimum. With both limits set, a row must break both. An optional
//! selective predicate only ever narrows the set of deleted rows.

use std::fmt;

use crate::scanner::CandidateRow;

/// Write metadata limits. At least one is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionThreshold {
    /// Delete rows whose TTL exceeds this many seconds.
    MaxTtl(i64),
    /// Delete rows written before this many microseconds since the epoch.
    MinWriteTime(i64),
    Both { max_ttl: i64, min_write_time: i64 },
}

/// Column equality check applied after the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectivePredicate {
    pub column: String,
    pub value: String,
}

impl SelectivePredicate {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// The column value rendered as text must equal the expected string.
    /// A null or unselected column never matches.
    pub fn matches(&self, row: &CandidateRow) -> bool {
        row.value(&self.column)
            .is_some_and(|value| value.to_string() == self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionRule {
    threshold: RetentionThreshold,
    predicate: Option<SelectivePredicate>,
}

/// Why a row was or was not selected for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Expired,
    TtlWithinLimit,
    WriteTimeWithinLimit,
    PredicateMismatch,
}

impl Verdict {
    pub fn should_delete(self) -> bool {
        self == Self::Expired
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => "expired",
            Self::TtlWithinLimit => "ttl within limit",
            Self::WriteTimeWithinLimit => "write time within limit",
            Self::PredicateMismatch => "predicate mismatch",
        })
    }
}

impl RetentionRule {
    pub fn new(threshold: RetentionThreshold) -> Self {
        Self {
            threshold,
            predicate: None,
        }
    }

    /// Build from optional limits. Returns `None` when neither is set.
    pub fn from_limits(max_ttl: Option<i64>, min_write_time: Option<i64>) -> Option<Self> {
        let threshold = match (max_ttl, min_write_time) {
            (Some(max_ttl), Some(min_write_time)) => RetentionThreshold::Both {
                max_ttl,
                min_write_time,
            },
            (Some(max_ttl), None) => RetentionThreshold::MaxTtl(max_ttl),
            (None, Some(min_write_time)) => RetentionThreshold::MinWriteTime(min_write_time),
            (None, None) => return None,
        };
        Some(Self::new(threshold))
    }

    pub fn with_predicate(mut self, predicate: SelectivePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn threshold(&self) -> RetentionThreshold {
        self.threshold
    }

    pub fn predicate(&self) -> Option<&SelectivePredicate> {
        self.predicate.as_ref()
    }

    pub fn evaluate(&self, row: &CandidateRow) -> Verdict {
        let ttl_exceeded = |max: i64| row.ttl().is_some_and(|ttl| ttl > max);
        let written_before = |min: i64| row.write_time().is_some_and(|wt| wt < min);

        let verdict = match self.threshold {
            RetentionThreshold::MaxTtl(max) if !ttl_exceeded(max) => Verdict::TtlWithinLimit,
            RetentionThreshold::MinWriteTime(min) if !written_before(min) => {
                Verdict::WriteTimeWithinLimit
            }
            RetentionThreshold::Both {
                max_ttl,
                min_write_time,
            } => {
                if !ttl_exceeded(max_ttl) {
                    Verdict::TtlWithinLimit
                } else if !written_before(min_write_time) {
                    Verdict::WriteTimeWithinLimit
                } else {
                    Verdict::Expired
                }
            }
            _ => Verdict::Expired,
        };

        match &self.predicate {
            Some(predicate) if verdict.should_delete() && !predicate.matches(row) => {
                Verdict::PredicateMismatch
            }
            _ => verdict,
        }
    }

    pub fn should_delete(&self, row: &CandidateRow) -> bool {
        self.evaluate(row).should_delete()
    }
}
