//! Streaming transport to the ingestion backend
//!
//! The session controller only sees the [`StreamTransport`] trait: open a
//! stream for some filtering options, receive a confirmed session id plus an
//! ordered sequence of [`StreamMessage`]s. Dropping the stream closes the
//! underlying connection, which is how external cancellation reaches the
//! wire. The backend tolerates an immediate re-open after a failure.
//!
//! [`HttpStreamTransport`] is the production implementation: an HTTP GET
//! whose response body is a newline-delimited JSON event stream.

use crate::config::{IngestOptions, TransportConfig};
use crate::error::{Error, Result};
use crate::types::{SessionId, StreamMessage};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// Response header carrying the backend-assigned session identifier
pub const SESSION_ID_HEADER: &str = "x-ingest-session";

/// Ordered stream of upstream messages
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage>> + Send>>;

/// Transport seam between the session controller and the backend
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a streaming connection for the given options
    ///
    /// Resolves only once the backend has confirmed the stream (the returned
    /// [`SessionId`] is the confirmation); a connection that fails before
    /// that point yields an error and no session identifier.
    async fn open(&self, options: &IngestOptions) -> Result<(SessionId, MessageStream)>;
}

/// HTTP implementation reading newline-delimited JSON messages
#[derive(Clone, Debug)]
pub struct HttpStreamTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpStreamTransport {
    /// Build a transport for the configured endpoint
    pub fn new(config: TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, options: &IngestOptions) -> Result<(SessionId, MessageStream)> {
        let mut url = self.config.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("cache", options.cache.as_query_value());
            if let Some(category) = &options.category {
                query.append_pair("category", category);
            }
        }

        tracing::debug!(url = %url, "opening ingestion stream");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "backend returned HTTP {status} opening the stream"
            )));
        }

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(SessionId::new)
            .ok_or_else(|| {
                Error::Protocol(format!("missing {SESSION_ID_HEADER} header on stream open"))
            })?;

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            LineReader::new(bytes),
            |mut reader| async move { reader.next_message().await.map(|item| (item, reader)) },
        );

        Ok((session_id, Box::pin(stream)))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Buffers raw chunks and yields one parsed message per non-empty line
struct LineReader {
    bytes: ByteStream,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl LineReader {
    fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            decoder: LineDecoder::default(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(parse_line(&line));
            }
            if self.exhausted {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in self.decoder.push(&chunk) {
                        if !line.trim().is_empty() {
                            self.pending.push_back(line);
                        }
                    }
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Some(Err(Error::Transport(format!("stream read failed: {e}"))));
                }
                None => {
                    self.exhausted = true;
                    if let Some(line) = self.decoder.finish()
                        && !line.trim().is_empty()
                    {
                        self.pending.push_back(line);
                    }
                }
            }
        }
    }
}

/// Splits a byte stream into lines across chunk boundaries
#[derive(Default)]
struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // trailing '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned())
        }
    }
}

fn parse_line(line: &str) -> Result<StreamMessage> {
    serde_json::from_str(line)
        .map_err(|e| Error::Protocol(format!("unparseable stream message: {e}: {line}")))
}
