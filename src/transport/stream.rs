//! Pull-based byte streams over a dedicated channel pair.
//!
//! # Protocol
//! ```text
//! consumer ── More ─────────▶ producer   (one per chunk it is ready to take)
//! consumer ◀─ Chunk(bytes) ── producer   (only after a More)
//! consumer ◀─ End ─────────── producer   (clean termination)
//! consumer ◀─ Error(reason) ─ producer   (either side may abort)
//! ```
//!
//! # Design Decisions
//! - The producer never holds more than one unacknowledged chunk; `write`
//!   suspends until the next pull arrives
//! - A channel that closes before `End`/`Error` surfaces as `ChannelClosed`
//!   on both sides instead of hanging

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

/// Upper bound on buffer space reserved from a declared length. The
/// declared length may come from a remote `Content-Length`.
const MAX_PREALLOC: u64 = 64 * 1024;

/// Errors surfaced by either side of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The other side went away without ending or aborting the stream.
    #[error("Stream channel closed before end of data")]
    ChannelClosed,
    /// The other side aborted the stream.
    #[error("Stream aborted: {0}")]
    Aborted(String),
    /// Write after end or abort.
    #[error("Stream already finished")]
    Finished,
}

#[derive(Debug)]
enum Frame {
    Chunk(Bytes),
    End,
    Error(String),
}

#[derive(Debug)]
enum Control {
    More,
    Error(String),
}

/// Create a connected producer/consumer pair.
///
/// `length` is the total body size if the producer knows it up front.
pub fn pipe(length: Option<u64>) -> (StreamWriter, StreamReader) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    (
        StreamWriter {
            frames: frames_tx,
            control: control_rx,
            credits: 0,
            finished: false,
        },
        StreamReader {
            frames: frames_rx,
            control: control_tx,
            length,
            finished: false,
        },
    )
}

/// Producer side.
#[derive(Debug)]
pub struct StreamWriter {
    frames: mpsc::UnboundedSender<Frame>,
    control: mpsc::UnboundedReceiver<Control>,
    credits: usize,
    finished: bool,
}

impl StreamWriter {
    /// Send one chunk, waiting for the consumer to pull it.
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        if self.finished {
            return Err(StreamError::Finished);
        }

        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }

        while self.credits == 0 {
            match self.control.recv().await {
                Some(Control::More) => self.credits += 1,
                Some(Control::Error(reason)) => {
                    self.finished = true;
                    return Err(StreamError::Aborted(reason));
                }
                None => {
                    self.finished = true;
                    return Err(StreamError::ChannelClosed);
                }
            }
        }

        self.credits -= 1;
        self.frames.send(Frame::Chunk(chunk)).map_err(|_| {
            self.finished = true;
            StreamError::ChannelClosed
        })
    }

    /// Signal a clean end of data.
    pub fn end(mut self) -> Result<(), StreamError> {
        self.finish(Frame::End)
    }

    /// Abort the stream; the consumer surfaces `reason` as a terminal error.
    pub fn abort(mut self, reason: impl Into<String>) -> Result<(), StreamError> {
        self.finish(Frame::Error(reason.into()))
    }

    fn finish(&mut self, frame: Frame) -> Result<(), StreamError> {
        if self.finished {
            return Err(StreamError::Finished);
        }
        self.finished = true;
        self.frames
            .send(frame)
            .map_err(|_| StreamError::ChannelClosed)
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct StreamReader {
    frames: mpsc::UnboundedReceiver<Frame>,
    control: mpsc::UnboundedSender<Control>,
    length: Option<u64>,
    finished: bool,
}

impl StreamReader {
    /// Total size announced by the producer, if known.
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Pull the next chunk. `Ok(None)` marks the end of data.
    pub async fn read(&mut self) -> Result<Option<Bytes>, StreamError> {
        if self.finished {
            return Ok(None);
        }

        // A failed pull means the producer is gone; a terminal frame may
        // still be queued, so keep reading.
        let _ = self.control.send(Control::More);

        match self.frames.recv().await {
            Some(Frame::Chunk(chunk)) => Ok(Some(chunk)),
            Some(Frame::End) => {
                self.finished = true;
                Ok(None)
            }
            Some(Frame::Error(reason)) => {
                self.finished = true;
                Err(StreamError::Aborted(reason))
            }
            None => {
                self.finished = true;
                Err(StreamError::ChannelClosed)
            }
        }
    }

    /// Abort from the consumer side; the producer's next write fails.
    pub fn abort(mut self, reason: impl Into<String>) {
        self.finished = true;
        let _ = self.control.send(Control::Error(reason.into()));
    }

    /// Buffer the whole stream.
    pub async fn collect(mut self) -> Result<Bytes, StreamError> {
        let mut buf = match self.length {
            Some(len) => BytesMut::with_capacity(len.min(MAX_PREALLOC) as usize),
            None => BytesMut::new(),
        };
        while let Some(chunk) = self.read().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Adapt into a `futures` stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_waits_for_pull() {
        let (mut writer, mut reader) = pipe(None);

        let blocked = tokio::time::timeout(Duration::from_millis(50), writer.write("a")).await;
        assert!(blocked.is_err(), "write must not complete before a pull");

        let producer = tokio::spawn(async move {
            writer.write("a").await.unwrap();
            writer.write("b").await.unwrap();
            writer.end().unwrap();
        });

        assert_eq!(reader.read().await.unwrap(), Some(Bytes::from("a")));
        assert_eq!(reader.read().await.unwrap(), Some(Bytes::from("b")));
        assert_eq!(reader.read().await.unwrap(), None);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_at_most_one_unacknowledged_chunk() {
        let (mut writer, mut reader) = pipe(None);
        let written = Arc::new(AtomicUsize::new(0));
        let w = written.clone();

        let producer = tokio::spawn(async move {
            for i in 0..10u8 {
                writer.write(vec![i; 4]).await.unwrap();
                w.fetch_add(1, Ordering::SeqCst);
            }
            writer.end().unwrap();
        });

        let mut total = Vec::new();
        let mut reads = 0;
        while let Some(chunk) = reader.read().await.unwrap() {
            reads += 1;
            total.extend_from_slice(&chunk);
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(written.load(Ordering::SeqCst) <= reads);
        }

        producer.await.unwrap();
        let expected: Vec<u8> = (0..10u8).flat_map(|i| vec![i; 4]).collect();
        assert_eq!(total, expected);
    }

    #[tokio::test]
    async fn test_collect_ignores_oversized_declared_length() {
        let (mut writer, reader) = pipe(Some(u64::MAX / 2));
        tokio::spawn(async move {
            writer.write("tiny").await.unwrap();
            writer.end().unwrap();
        });
        assert_eq!(reader.collect().await.unwrap(), Bytes::from("tiny"));
    }

    #[tokio::test]
    async fn test_dropped_writer_surfaces_channel_closed() {
        let (writer, mut reader) = pipe(None);
        drop(writer);
        assert_eq!(reader.read().await, Err(StreamError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_consumer_abort_fails_producer() {
        let (mut writer, reader) = pipe(None);
        reader.abort("consumer gave up");
        assert_eq!(
            writer.write("x").await,
            Err(StreamError::Aborted("consumer gave up".into()))
        );
    }

    #[tokio::test]
    async fn test_producer_abort_surfaces_error() {
        let (writer, mut reader) = pipe(None);
        writer.abort("boom").unwrap();
        assert_eq!(reader.read().await, Err(StreamError::Aborted("boom".into())));
    }

    #[tokio::test]
    async fn test_dropped_reader_fails_writer() {
        let (mut writer, reader) = pipe(None);
        drop(reader);
        assert_eq!(writer.write("x").await, Err(StreamError::ChannelClosed));
    }
}
