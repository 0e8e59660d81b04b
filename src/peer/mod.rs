//! Remote worker endpoint for the batch protocol.
//!
//! Listens on the tasks and results ports, accepts one connection on each
//! and serves exactly one batch:
//!
//! 1. the task side reads `BEGIN n`, hands `n` to the result side, and
//!    queues every `index;payload` line on a bounded pool of hashing
//!    workers, then expects `END`;
//! 2. the result side writes `RESULTS n`, streams `index;value` lines in
//!    completion order, and writes `DONE` only once all `n` went out.
//!
//! If the task side fails, the result side stops without `DONE`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::{NetworkConfig, PeerConfig};
use crate::protocol::{
    line_str, parse_header, parse_task_line, result_line, results_line, Channel, LineCodec,
    StreamError, MSG_BEGIN, MSG_DONE, MSG_END,
};

pub mod hash;

/// What the result side managed to send.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PeerSummary {
    pub declared: usize,
    pub sent: usize,
    /// `DONE` was written.
    pub completed: bool,
}

pub struct PeerServer {
    tasks: TcpListener,
    results: TcpListener,
    workers: usize,
    rounds: u32,
}

impl PeerServer {
    /// Bind both listeners at `network.host` on the configured ports.
    /// Port 0 picks an ephemeral port.
    pub async fn bind(network: &NetworkConfig, peer: &PeerConfig) -> Result<Self> {
        let tasks_addr = network.tasks_addr()?;
        let results_addr = network.results_addr()?;
        let tasks = TcpListener::bind(tasks_addr)
            .await
            .with_context(|| format!("failed to bind tasks listener on {}", tasks_addr))?;
        let results = TcpListener::bind(results_addr)
            .await
            .with_context(|| format!("failed to bind results listener on {}", results_addr))?;

        let workers = peer.effective_workers();
        info!(
            tasks = %tasks.local_addr()?,
            results = %results.local_addr()?,
            workers,
            rounds = peer.rounds,
            "peer listening"
        );
        Ok(Self {
            tasks,
            results,
            workers,
            rounds: peer.rounds,
        })
    }

    pub fn tasks_addr(&self) -> Result<SocketAddr> {
        self.tasks.local_addr().context("tasks listener has no address")
    }

    pub fn results_addr(&self) -> Result<SocketAddr> {
        self.results
            .local_addr()
            .context("results listener has no address")
    }

    /// Accept one connection per channel and serve a single batch.
    pub async fn serve_once(self) -> Result<PeerSummary> {
        let ((tasks_conn, tasks_from), (results_conn, results_from)) =
            tokio::try_join!(self.tasks.accept(), self.results.accept())
                .context("failed to accept coordinator connections")?;
        info!(%tasks_from, %results_from, "coordinator connected");

        let (count_tx, count_rx) = oneshot::channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(self.workers));

        let receiving = tokio::spawn(receive_tasks(
            tasks_conn,
            count_tx,
            result_tx,
            permits,
            self.rounds,
        ));
        let sending = tokio::spawn(send_results(results_conn, count_rx, result_rx));
        let (received, sent) = tokio::join!(receiving, sending);

        let summary = sent.context("result sender panicked")??;
        let tasks = received.context("task receiver panicked")??;
        info!(
            tasks,
            sent = summary.sent,
            completed = summary.completed,
            "peer finished batch"
        );
        Ok(summary)
    }
}

async fn receive_tasks(
    conn: TcpStream,
    count_tx: oneshot::Sender<usize>,
    result_tx: mpsc::UnboundedSender<(usize, u32)>,
    permits: Arc<Semaphore>,
    rounds: u32,
) -> Result<usize, StreamError> {
    let mut lines = FramedRead::new(conn, LineCodec::new());

    let header = next_line(&mut lines).await?;
    let n = parse_header(&header, MSG_BEGIN).ok_or_else(|| {
        StreamError::protocol(
            Channel::Tasks,
            format!("bad header {:?} (expected 'BEGIN n')", header),
        )
    })?;
    // The result side may already have given up; nothing to do then.
    let _ = count_tx.send(n);
    debug!(declared = n, "task header received");

    for _ in 0..n {
        let line = next_line(&mut lines).await?;
        let (index, payload) = parse_task_line(&line).ok_or_else(|| {
            StreamError::protocol(Channel::Tasks, format!("bad task line {:?}", line))
        })?;
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|_| StreamError::lost(Channel::Tasks, "worker pool closed"))?;

        let payload = payload.to_string();
        let tx = result_tx.clone();
        tokio::task::spawn_blocking(move || {
            let value = hash::digest_rounds(&payload, rounds);
            let _ = tx.send((index, value));
            drop(permit);
        });
    }

    let end = next_line(&mut lines).await?;
    if end != MSG_END {
        return Err(StreamError::protocol(
            Channel::Tasks,
            format!("bad end marker {:?} (expected 'END')", end),
        ));
    }
    Ok(n)
}

async fn send_results(
    conn: TcpStream,
    count_rx: oneshot::Receiver<usize>,
    mut result_rx: mpsc::UnboundedReceiver<(usize, u32)>,
) -> Result<PeerSummary, StreamError> {
    let mut sink = FramedWrite::new(conn, LineCodec::new());
    let codec_err = |e| StreamError::from_codec(Channel::Results, e);

    let Ok(n) = count_rx.await else {
        warn!("task stream failed before BEGIN, closing results channel");
        return Ok(PeerSummary {
            declared: 0,
            sent: 0,
            completed: false,
        });
    };

    sink.send(results_line(n)).await.map_err(codec_err)?;
    let mut sent = 0;
    while sent < n {
        let Some((index, value)) = result_rx.recv().await else {
            break;
        };
        sink.send(result_line(index, value)).await.map_err(codec_err)?;
        sent += 1;
    }

    let completed = sent == n;
    if completed {
        sink.send(MSG_DONE.to_string()).await.map_err(codec_err)?;
    } else {
        warn!(sent, declared = n, "task stream ended early, withholding DONE");
    }
    sink.close().await.map_err(codec_err)?;

    Ok(PeerSummary {
        declared: n,
        sent,
        completed,
    })
}

async fn next_line(lines: &mut FramedRead<TcpStream, LineCodec>) -> Result<String, StreamError> {
    match lines.next().await {
        Some(Ok(line)) => line_str(Channel::Tasks, &line).map(str::to_string),
        Some(Err(e)) => Err(StreamError::from_codec(Channel::Tasks, e)),
        None => Err(StreamError::lost(Channel::Tasks, "coordinator closed before END")),
    }
}
