//! Inbound half: reads values back from the peer, keyed by task index.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace};

use super::{
    line_str, parse_header, parse_result_line, Channel, LineCodec, ResultLine, StreamError,
    MSG_RESULTS,
};

/// Values received on the results channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResults {
    /// Sized by the peer's `RESULTS <n>`; indices never sent stay 0.
    pub values: Vec<u32>,
    /// From reading the header to reading `DONE`.
    pub elapsed: Duration,
    /// Value lines stored (duplicates counted each time).
    pub stored: usize,
    /// Lines skipped: no separator, or index outside `[0, n)`.
    pub ignored: usize,
}

/// Owns the results connection for the lifetime of one batch.
pub struct ResultStreamer<R> {
    lines: FramedRead<R, LineCodec>,
}

impl<R: AsyncRead + Unpin> ResultStreamer<R> {
    pub fn new(conn: R) -> Self {
        Self {
            lines: FramedRead::new(conn, LineCodec::new()),
        }
    }

    /// Read `RESULTS n`, then `index;value` lines until `DONE`.
    ///
    /// The result array is allocated once from the header and only this
    /// call writes into it. Later duplicates overwrite earlier values.
    pub async fn receive(mut self) -> Result<RemoteResults, StreamError> {
        let header = self.next_line().await?;
        let header = line_str(Channel::Results, &header)?;
        let n = parse_header(header, MSG_RESULTS).ok_or_else(|| {
            StreamError::protocol(
                Channel::Results,
                format!("bad header {:?} (expected 'RESULTS n')", header),
            )
        })?;
        let start = Instant::now();
        debug!(declared = n, "results header received");

        let mut values = Vec::new();
        values.try_reserve_exact(n).map_err(|e| {
            StreamError::protocol(
                Channel::Results,
                format!("cannot hold {} declared results: {}", n, e),
            )
        })?;
        values.resize(n, 0u32);
        let mut stored = 0;
        let mut ignored = 0;
        loop {
            let line = self.next_line().await?;
            match parse_result_line(&line, n)
                .map_err(|detail| StreamError::protocol(Channel::Results, detail))?
            {
                ResultLine::Done => break,
                ResultLine::Value { index, value } => {
                    values[index] = value;
                    stored += 1;
                }
                ResultLine::OutOfRange { index } => {
                    trace!(index, declared = n, "ignoring out-of-range result");
                    ignored += 1;
                }
                ResultLine::Noise => {
                    trace!(
                        line = %String::from_utf8_lossy(&line),
                        "ignoring line without separator"
                    );
                    ignored += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        debug!(declared = n, stored, ignored, "results stream complete");
        Ok(RemoteResults {
            values,
            elapsed,
            stored,
            ignored,
        })
    }

    async fn next_line(&mut self) -> Result<BytesMut, StreamError> {
        match self.lines.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(StreamError::from_codec(Channel::Results, e)),
            None => Err(StreamError::lost(
                Channel::Results,
                "peer closed before DONE",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn receive(wire: &'static str) -> Result<RemoteResults, StreamError> {
        receive_raw(wire.as_bytes()).await
    }

    async fn receive_raw(wire: &'static [u8]) -> Result<RemoteResults, StreamError> {
        ResultStreamer::new(wire).receive().await
    }

    #[tokio::test]
    async fn test_out_of_order_results_land_by_index() {
        let res = receive("RESULTS 3\n1;99\n0;42\n2;7\nDONE\n").await.unwrap();
        assert_eq!(res.values, vec![42, 99, 7]);
        assert_eq!(res.stored, 3);
        assert_eq!(res.ignored, 0);
    }

    #[tokio::test]
    async fn test_missing_indices_default_to_zero() {
        let res = receive("RESULTS 5\n4;1\n0;2\n2;3\nDONE\n").await.unwrap();
        assert_eq!(res.values, vec![2, 0, 3, 0, 1]);
    }

    #[tokio::test]
    async fn test_noise_and_out_of_range_are_ignored() {
        let clean = receive("RESULTS 2\n0;5\n1;6\nDONE\n").await.unwrap();
        let noisy = receive("RESULTS 2\n0;5\nhello\n2;100\n-1;100\n1;6\n\nDONE\n")
            .await
            .unwrap();
        assert_eq!(noisy.values, clean.values);
        assert_eq!(noisy.ignored, 4);
    }

    #[tokio::test]
    async fn test_non_utf8_noise_is_ignored() {
        let res = receive_raw(b"RESULTS 2\n0;5\n\xff\xfe garbage\n1;6\nDONE\n")
            .await
            .unwrap();
        assert_eq!(res.values, vec![5, 6]);
        assert_eq!(res.ignored, 1);
    }

    #[tokio::test]
    async fn test_non_utf8_result_line_is_protocol_error() {
        let err = receive_raw(b"RESULTS 2\n0;\xff\nDONE\n").await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Protocol {
                channel: Channel::Results,
                ..
            }
        ));

        let err = receive_raw(b"RESULTS \xff\n").await.unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_unallocatable_count_is_protocol_error() {
        let err = receive("RESULTS 18446744073709551615\nDONE\n")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Protocol {
                channel: Channel::Results,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_index_last_write_wins() {
        let res = receive("RESULTS 1\n0;1\n0;2\n0;3\nDONE\n").await.unwrap();
        assert_eq!(res.values, vec![3]);
        assert_eq!(res.stored, 3);
    }

    #[tokio::test]
    async fn test_crlf_lines_accepted() {
        let res = receive("RESULTS 2\r\n0;8\r\n1;9\r\nDONE\r\n").await.unwrap();
        assert_eq!(res.values, vec![8, 9]);
    }

    #[tokio::test]
    async fn test_zero_results() {
        let res = receive("RESULTS 0\n0;1\nDONE\n").await.unwrap();
        assert!(res.values.is_empty());
        assert_eq!(res.ignored, 1);
    }

    #[tokio::test]
    async fn test_bad_header_is_protocol_error() {
        for wire in ["RESULT 3\n", "BEGIN 3\n", "RESULTS three\n", "\n"] {
            let err = receive(wire).await.unwrap_err();
            assert!(
                matches!(err, StreamError::Protocol { channel: Channel::Results, .. }),
                "{:?} gave {:?}",
                wire,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_value_is_protocol_error() {
        let err = receive("RESULTS 2\n0;abc\nDONE\n").await.unwrap_err();
        assert!(matches!(err, StreamError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_close_before_done_is_connection_lost() {
        let err = receive("RESULTS 2\n0;1\n").await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::ConnectionLost { channel: Channel::Results, .. }
        ));

        let err = receive("").await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_partial_sentinel_is_connection_lost() {
        let err = receive("RESULTS 1\n0;1\nDONE").await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_stops_reading_at_done() {
        // Anything after DONE is never read.
        let res = receive("RESULTS 1\n0;1\nDONE\n0;999\n").await.unwrap();
        assert_eq!(res.values, vec![1]);
    }
}
