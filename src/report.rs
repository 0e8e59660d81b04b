//! Merged batch report and its fixed-width text rendering.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::Record;

const W_NAME: usize = 22;
const W_GAMES: usize = 10;
const W_WINNING: usize = 14;
const W_ACCEL: usize = 18;
const W_REMOTE: usize = 18;

/// One merged row: the record plus both computed values at its task index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub record: Record,
    pub accel_value: u32,
    pub remote_value: u32,
}

/// Outcome of a successful batch.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub accel_device: String,
    pub accel_seconds: f64,
    pub remote_seconds: f64,
    pub rows: Vec<ReportRow>,
    /// Batch entries with no row because a result array was shorter.
    pub dropped: usize,
}

impl Report {
    pub fn remote_values(&self) -> Vec<u32> {
        self.rows.iter().map(|r| r.remote_value).collect()
    }

    pub fn accel_values(&self) -> Vec<u32> {
        self.rows.iter().map(|r| r.accel_value).collect()
    }
}

fn rule(widths: &[usize]) -> String {
    let parts: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    parts.join("+")
}

fn row(widths: &[usize], cells: &[&str]) -> String {
    let parts: Vec<String> = widths
        .iter()
        .zip(cells)
        .map(|(w, c)| format!("{:<width$}", c, width = *w))
        .collect();
    parts.join("|")
}

/// Report text: the merged table followed by every input record.
struct Rendered<'a> {
    report: &'a Report,
    all_records: &'a [Record],
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        let merged = [W_NAME, W_GAMES, W_WINNING, W_ACCEL, W_REMOTE];
        let starting = [W_NAME, W_GAMES, W_WINNING];

        writeln!(f, "Run: {} ({})", report.run_id, report.generated_at.to_rfc3339())?;
        writeln!(f, "Accelerator device: {}", report.accel_device)?;
        writeln!(f, "Accelerator time: {:.6} s", report.accel_seconds)?;
        writeln!(f, "Remote time: {:.6} s", report.remote_seconds)?;
        writeln!(f)?;

        writeln!(f, "RESULTS (filtered) - accelerator and remote separately")?;
        writeln!(f, "{}", rule(&merged))?;
        writeln!(
            f,
            "{}",
            row(&merged, &["name", "games", "winning", "accel_val", "remote_val"])
        )?;
        writeln!(f, "{}", rule(&merged))?;
        for r in &report.rows {
            let games = r.record.games.to_string();
            let winning = format!("{:.3}", r.record.winning);
            let accel = r.accel_value.to_string();
            let remote = r.remote_value.to_string();
            let cells = [
                r.record.name.as_str(),
                games.as_str(),
                winning.as_str(),
                accel.as_str(),
                remote.as_str(),
            ];
            writeln!(f, "{}", row(&merged, &cells))?;
        }
        writeln!(f, "{}", rule(&merged))?;
        if report.dropped > 0 {
            writeln!(
                f,
                "\nWARNING: dropped {} rows due to missing results",
                report.dropped
            )?;
        }
        writeln!(f)?;

        writeln!(f, "STARTING DATA (all records)")?;
        writeln!(f, "{}", rule(&starting))?;
        writeln!(f, "{}", row(&starting, &["name", "games", "winning"]))?;
        writeln!(f, "{}", rule(&starting))?;
        for r in self.all_records {
            let games = r.games.to_string();
            let winning = format!("{:.3}", r.winning);
            let cells = [r.name.as_str(), games.as_str(), winning.as_str()];
            writeln!(f, "{}", row(&starting, &cells))?;
        }
        writeln!(f, "{}", rule(&starting))
    }
}

/// Render the report followed by a table of every input record.
pub fn render(report: &Report, all_records: &[Record]) -> String {
    Rendered {
        report,
        all_records,
    }
    .to_string()
}

/// Render and write the report, creating parent directories.
pub fn write_report(path: &Path, report: &Report, all_records: &[Record]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create output directory: {}", parent.display()))?;
    }
    std::fs::write(path, render(report, all_records))
        .with_context(|| format!("cannot write output file: {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = report.rows.len(), "report written");
    Ok(())
}
