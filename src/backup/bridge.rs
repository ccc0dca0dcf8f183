//! Single-producer, single-consumer conduit between the dump process and the
//! upload.
//!
//! The channel holds at most one chunk, so a write waits until the previous
//! chunk has been taken and memory use stays flat however large the dump is.
//! The stream ends in exactly one of three ways: an explicit end marker, an
//! explicit failure carrying the producer's error, or the writer being
//! dropped without either (reported as a failure too). A reader therefore
//! never mistakes a dead producer for a complete dump.

use crate::error::StreamError;
use crate::upload::ChunkSource;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

enum Frame {
    Data(Vec<u8>),
    End,
    Failed(String),
}

#[derive(Debug, Error)]
#[error("dump stream reader has gone away")]
pub struct ReaderGone;

pub fn channel() -> (BridgeWriter, BridgeReader) {
    let (tx, rx) = mpsc::channel(1);
    (
        BridgeWriter { tx },
        BridgeReader {
            rx,
            terminal: None,
        },
    )
}

pub struct BridgeWriter {
    tx: mpsc::Sender<Frame>,
}

impl BridgeWriter {
    /// Waits until the reader has room for one more chunk.
    pub async fn write(&self, chunk: Vec<u8>) -> Result<(), ReaderGone> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(Frame::Data(chunk)).await.map_err(|_| ReaderGone)
    }

    /// Marks the stream as complete.
    pub async fn finish(self) -> Result<(), ReaderGone> {
        self.tx.send(Frame::End).await.map_err(|_| ReaderGone)
    }

    /// Ends the stream with an error the reader will see on its next read.
    pub async fn fail(self, reason: impl Into<String>) {
        // Nobody left to tell if the reader is gone.
        let _ = self.tx.send(Frame::Failed(reason.into())).await;
    }
}

pub struct BridgeReader {
    rx: mpsc::Receiver<Frame>,
    terminal: Option<Result<(), StreamError>>,
}

impl BridgeReader {
    /// `Ok(None)` only after the writer called `finish`.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if let Some(terminal) = &self.terminal {
            return terminal.clone().map(|_| None);
        }

        let outcome = match self.rx.recv().await {
            Some(Frame::Data(chunk)) => return Ok(Some(chunk)),
            Some(Frame::End) => Ok(()),
            Some(Frame::Failed(reason)) => Err(StreamError::ProducerFailed(reason)),
            None => Err(StreamError::ProducerVanished),
        };
        self.rx.close();
        self.terminal = Some(outcome.clone());
        outcome.map(|_| None)
    }
}

#[async_trait]
impl ChunkSource for BridgeReader {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        BridgeReader::next_chunk(self).await
    }
}
