//! JSON record loader.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::Record;

#[derive(Debug, Deserialize)]
struct InputFile {
    player: Vec<Record>,
}

/// Parse `{"player": [...]}` from a string.
pub fn parse_records(json: &str) -> Result<Vec<Record>> {
    let file: InputFile = serde_json::from_str(json).context("invalid record JSON")?;
    Ok(file.player)
}

/// Read and parse the record file at `path`.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot open input file: {}", path.display()))?;
    let records =
        parse_records(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::info!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}
