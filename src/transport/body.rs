//! Request/response bodies: inline bytes or a pull-based stream.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::transport::stream::{pipe, StreamError, StreamReader, StreamWriter};

/// A message body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully buffered, sent inline in the message.
    Full(Bytes),
    /// Streamed over its own channel pair with backpressure.
    Stream(StreamReader),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    /// Create a streamed body and the writer that feeds it.
    pub fn channel(length: Option<u64>) -> (StreamWriter, Body) {
        let (writer, reader) = pipe(length);
        (writer, Body::Stream(reader))
    }

    /// Pump any stream of chunks into a streamed body.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S, E>(stream: S, length: Option<u64>) -> Body
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (mut writer, body) = Body::channel(length);
        tokio::spawn(async move {
            futures_util::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if writer.write(chunk).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = writer.abort(e.to_string());
                        return;
                    }
                }
            }
            let _ = writer.end();
        });
        body
    }

    /// Size of the body if known without reading it.
    pub fn length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::Stream(reader) => reader.length(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Buffer the whole body.
    pub async fn collect(self) -> Result<Bytes, StreamError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(reader) => reader.collect().await,
        }
    }

    /// Collect streams announced below `max_inline` bytes so they travel
    /// inline; streams of unknown or larger size stay streamed.
    pub async fn inline_if_small(self, max_inline: usize) -> Result<Body, StreamError> {
        match self {
            Body::Stream(reader) => match reader.length() {
                Some(len) if len < max_inline as u64 => Ok(Body::Full(reader.collect().await?)),
                _ => Ok(Body::Stream(reader)),
            },
            other => Ok(other),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Full(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}
