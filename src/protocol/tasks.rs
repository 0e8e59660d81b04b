//! Outbound half: streams the batch to the peer one task per line.

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use super::{begin_line, task_line, Channel, LineCodec, StreamError, MSG_END};
use crate::model::FilteredBatch;

/// Owns the tasks connection for the lifetime of one batch.
pub struct TaskStreamer<W> {
    sink: FramedWrite<W, LineCodec>,
}

impl<W: AsyncWrite + Unpin> TaskStreamer<W> {
    pub fn new(conn: W) -> Self {
        Self {
            sink: FramedWrite::new(conn, LineCodec::new()),
        }
    }

    /// Send `BEGIN n`, every task in ascending index order, then `END`, and
    /// shut down the write side.
    ///
    /// Each line is written and flushed in full before the next is built.
    pub async fn send(mut self, batch: &FilteredBatch) -> Result<(), StreamError> {
        self.send_line(begin_line(batch.len())).await?;
        for (index, record) in batch.tasks() {
            self.send_line(task_line(index, &record.payload())).await?;
        }
        self.send_line(MSG_END.to_string()).await?;

        self.sink
            .close()
            .await
            .map_err(|e| StreamError::from_codec(Channel::Tasks, e))?;
        debug!(tasks = batch.len(), "task stream complete");
        Ok(())
    }

    async fn send_line(&mut self, line: String) -> Result<(), StreamError> {
        self.sink
            .send(line)
            .await
            .map_err(|e| StreamError::from_codec(Channel::Tasks, e))
    }
}
