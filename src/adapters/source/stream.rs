//! Newline-delimited JSON over TCP (`message-stream-listener`)
//!
//! Accepts one connection at a time and reads one JSON object per line.
//! When a sender disconnects the listener waits for the next one. With
//! `max_messages` set the source ends after that many messages; otherwise it
//! runs until the job is stopped.

use super::{Source, SourceFactory, SourceResult};
use crate::domain::errors::SourceError;
use crate::domain::job::SourceSpec;
use crate::domain::record::{flatten_document, FlatRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::{TcpListener, TcpStream};

/// Connector type name
pub const CONNECTOR: &str = "message-stream-listener";

/// Opens [`MessageStreamSource`]s
pub struct MessageStreamSourceFactory;

#[async_trait]
impl SourceFactory for MessageStreamSourceFactory {
    async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
        let bind = spec.require_str("bind")?;
        let max_messages = spec.get_u64("max_messages")?;
        Ok(Box::new(MessageStreamSource::bind(bind, max_messages).await?))
    }
}

/// TCP NDJSON listener
pub struct MessageStreamSource {
    listener: TcpListener,
    local_addr: SocketAddr,
    connection: Option<Lines<BufReader<TcpStream>>>,
    max_messages: Option<u64>,
    received: u64,
}

impl MessageStreamSource {
    /// Binds the listening socket
    ///
    /// # Errors
    ///
    /// [`SourceError::Unavailable`] when the address cannot be bound.
    pub async fn bind(bind: &str, max_messages: Option<u64>) -> SourceResult<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| SourceError::Unavailable(format!("cannot bind '{bind}': {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SourceError::Unavailable(format!("cannot bind '{bind}': {e}")))?;

        tracing::info!(address = %local_addr, "Message stream listener bound");
        Ok(Self {
            listener,
            local_addr,
            connection: None,
            max_messages,
            received: 0,
        })
    }

    /// Bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn exhausted(&self) -> bool {
        self.max_messages.is_some_and(|max| self.received >= max)
    }

    fn decode(&self, line: &str) -> SourceResult<FlatRecord> {
        match serde_json::from_str::<Value>(line) {
            Ok(document @ Value::Object(_)) => Ok(flatten_document(&document)),
            Ok(other) => Err(SourceError::MalformedRow {
                row: self.received,
                message: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(SourceError::MalformedRow {
                row: self.received,
                message: format!("invalid JSON: {e}"),
            }),
        }
    }
}

#[async_trait]
impl Source for MessageStreamSource {
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>> {
        loop {
            if self.exhausted() {
                return Ok(None);
            }

            if self.connection.is_none() {
                let (stream, peer) = self
                    .listener
                    .accept()
                    .await
                    .map_err(|e| SourceError::StreamFailed(format!("accept failed: {e}")))?;
                tracing::debug!(peer = %peer, "Message stream sender connected");
                self.connection = Some(BufReader::new(stream).lines());
            }
            let Some(lines) = self.connection.as_mut() else {
                continue;
            };

            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    self.received += 1;
                    return self.decode(line.trim()).map(Some);
                }
                Ok(None) => {
                    tracing::debug!("Message stream sender disconnected");
                    self.connection = None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Message stream connection error; waiting for next sender");
                    self.connection = None;
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("{CONNECTOR} {}", self.local_addr)
    }
}
