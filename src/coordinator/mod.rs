//! Batch coordinator: fans one batch out to three workers and merges.
//!
//! The accelerator, the task sender and the result receiver run
//! concurrently. Each owns its inputs (a connection, or a shared read-only
//! view of the batch) and hands back its output through its own
//! `JoinHandle`; nothing is read until all three have finished.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accel::{AccelError, AccelOutput, Accelerator};
use crate::config::NetworkConfig;
use crate::model::FilteredBatch;
use crate::protocol::{Channel, RemoteResults, ResultStreamer, StreamError, TaskStreamer};
use crate::report::Report;

pub mod merge;

pub use merge::merge;

/// The three concurrent units of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Sender,
    Receiver,
    Accelerator,
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Worker::Sender => write!(f, "task sender"),
            Worker::Receiver => write!(f, "result receiver"),
            Worker::Accelerator => write!(f, "accelerator"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Accel(#[from] AccelError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("{worker} panicked: {detail}")]
    WorkerPanicked { worker: Worker, detail: String },
}

/// Addresses of the peer's two listening ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub tasks_addr: SocketAddr,
    pub results_addr: SocketAddr,
}

impl CoordinatorConfig {
    pub fn from_network(network: &NetworkConfig) -> anyhow::Result<Self> {
        Ok(Self {
            tasks_addr: network.tasks_addr()?,
            results_addr: network.results_addr()?,
        })
    }
}

pub struct Coordinator<A> {
    config: CoordinatorConfig,
    accelerator: Arc<A>,
}

impl<A: Accelerator> Coordinator<A> {
    pub fn new(config: CoordinatorConfig, accelerator: A) -> Self {
        Self {
            config,
            accelerator: Arc::new(accelerator),
        }
    }

    /// Run one batch end to end.
    ///
    /// Both connections are opened before any worker starts; failing to
    /// open either aborts with `ConnectionLost` and nothing is sent.
    pub async fn run(&self, batch: FilteredBatch) -> Result<Report, BatchError> {
        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            tasks = batch.len(),
            tasks_addr = %self.config.tasks_addr,
            results_addr = %self.config.results_addr,
            "starting batch"
        );

        let tasks_conn = connect(Channel::Tasks, self.config.tasks_addr).await?;
        let results_conn = connect(Channel::Results, self.config.results_addr).await?;

        let batch = Arc::new(batch);

        let sender = {
            let batch = Arc::clone(&batch);
            tokio::spawn(async move { TaskStreamer::new(tasks_conn).send(&batch).await })
        };
        let receiver = tokio::spawn(ResultStreamer::new(results_conn).receive());
        let accelerator = {
            let accel = Arc::clone(&self.accelerator);
            let batch = Arc::clone(&batch);
            tokio::task::spawn_blocking(move || accel.run(batch.records()))
        };

        // Join barrier: all three reach a terminal state before anything
        // below looks at their outputs.
        let (sent, received, computed) = tokio::join!(sender, receiver, accelerator);

        let (remote, accel) = resolve_outcomes(
            joined(Worker::Sender, sent),
            joined(Worker::Receiver, received),
            joined(Worker::Accelerator, computed),
        )
        .map_err(|e| {
            error!(run_id = %run_id, error = %e, "batch failed");
            e
        })?;

        let (rows, dropped) = merge(batch.records(), &accel.values, &remote.values);
        if dropped > 0 {
            warn!(
                run_id = %run_id,
                dropped,
                declared = remote.values.len(),
                computed = accel.values.len(),
                "dropped rows due to missing results"
            );
        }
        info!(
            run_id = %run_id,
            rows = rows.len(),
            device = %accel.device,
            accel_ms = accel.elapsed.as_millis() as u64,
            remote_ms = remote.elapsed.as_millis() as u64,
            "batch complete"
        );

        Ok(Report {
            run_id,
            generated_at: Utc::now(),
            accel_device: accel.device,
            accel_seconds: accel.elapsed.as_secs_f64(),
            remote_seconds: remote.elapsed.as_secs_f64(),
            rows,
            dropped,
        })
    }
}

async fn connect(channel: Channel, addr: SocketAddr) -> Result<TcpStream, StreamError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| StreamError::lost(channel, format!("connect to {} failed: {}", addr, e)))
}

/// Flatten a worker's join result into one error type.
fn joined<T, E>(worker: Worker, res: Result<Result<T, E>, JoinError>) -> Result<T, BatchError>
where
    BatchError: From<E>,
{
    match res {
        Ok(inner) => inner.map_err(BatchError::from),
        Err(e) => Err(BatchError::WorkerPanicked {
            worker,
            detail: e.to_string(),
        }),
    }
}

/// Pick the batch outcome once every worker has finished.
///
/// Failures are inspected in a fixed order: task sender, then result
/// receiver, then accelerator. The first one found is returned; the others
/// are logged and dropped.
pub fn resolve_outcomes(
    sent: Result<(), BatchError>,
    received: Result<RemoteResults, BatchError>,
    computed: Result<AccelOutput, BatchError>,
) -> Result<(RemoteResults, AccelOutput), BatchError> {
    match (sent, received, computed) {
        (Ok(()), Ok(remote), Ok(accel)) => Ok((remote, accel)),
        (Err(e), received, computed) => Err(first_failure(
            Worker::Sender,
            e,
            [
                (Worker::Receiver, received.err()),
                (Worker::Accelerator, computed.err()),
            ],
        )),
        (Ok(()), Err(e), computed) => Err(first_failure(
            Worker::Receiver,
            e,
            [(Worker::Accelerator, computed.err())],
        )),
        (Ok(()), Ok(_), Err(e)) => Err(first_failure(Worker::Accelerator, e, [])),
    }
}

fn first_failure<const N: usize>(
    worker: Worker,
    err: BatchError,
    rest: [(Worker, Option<BatchError>); N],
) -> BatchError {
    for (other, discarded) in rest {
        if let Some(discarded) = discarded {
            warn!(
                worker = %other,
                error = %discarded,
                surfaced = %worker,
                "discarding lower-priority worker error"
            );
        }
    }
    err
}
