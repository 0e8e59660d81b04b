//! Records and the filtered batch that all three workers share.

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;

/// One input record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub games: i32,
    #[serde(rename = "winning", alias = "winningRate")]
    pub winning: f64,
}

impl Record {
    pub fn new(name: impl Into<String>, games: i32, winning: f64) -> Self {
        Self {
            name: name.into(),
            games,
            winning,
        }
    }

    /// `games * winning`, the first filter criterion.
    pub fn score(&self) -> f64 {
        f64::from(self.games) * self.winning
    }

    /// Task payload sent to the remote peer: `<games>,<winning>`.
    pub fn payload(&self) -> String {
        format!("{},{}", self.games, format_rate(self.winning))
    }
}

/// Integral rates keep one decimal (`55.0`); everything else uses the
/// shortest representation that round-trips.
fn format_rate(rate: f64) -> String {
    if rate.is_finite() && rate.fract() == 0.0 {
        format!("{:.1}", rate)
    } else {
        format!("{}", rate)
    }
}

/// Records that passed both filters, in filter order.
///
/// A record's position in `records` is its task index; indices are
/// contiguous `0..len()` and never reassigned.
#[derive(Debug, Clone, Default)]
pub struct FilteredBatch {
    records: Vec<Record>,
}

impl FilteredBatch {
    /// Keep the records that satisfy `games * winning >= min_score` and
    /// `winning >= min_winning`.
    pub fn filter(all: &[Record], filter: &FilterConfig) -> Self {
        let records = all
            .iter()
            .filter(|r| r.score() >= filter.min_score && r.winning >= filter.min_winning)
            .cloned()
            .collect();
        Self { records }
    }

    /// Wrap records that are already filtered.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(task index, record)` pairs in ascending index order.
    pub fn tasks(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.records.iter().enumerate()
    }
}
