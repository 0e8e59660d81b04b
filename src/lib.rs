//! batchlink -- distributed batch evaluation over a two-channel line protocol.
//!
//! A coordinator filters a set of records into a batch, streams it to a
//! remote peer on one TCP connection, reads the peer's values back on a
//! second connection, and runs a local accelerator over the same batch at
//! the same time. The three results are merged by task index into a report.

pub mod accel;
pub mod config;
pub mod coordinator;
pub mod input;
pub mod model;
pub mod peer;
pub mod protocol;
pub mod report;

use anyhow::Result;

use crate::accel::AccelerationManager;
use crate::config::BatchlinkConfig;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::model::{FilteredBatch, Record};
use crate::report::Report;

/// Filter `records` and run one batch against the peer named in `config`,
/// using the configured accelerator backend.
pub async fn run_batch(config: &BatchlinkConfig, records: &[Record]) -> Result<Report> {
    let batch = FilteredBatch::filter(records, &config.filter);
    tracing::info!(
        total = records.len(),
        filtered = batch.len(),
        min_score = config.filter.min_score,
        min_winning = config.filter.min_winning,
        "batch filtered"
    );

    let coordinator = Coordinator::new(
        CoordinatorConfig::from_network(&config.network)?,
        AccelerationManager::new(config.accel.clone()),
    );
    let report = coordinator.run(batch).await?;
    Ok(report)
}
