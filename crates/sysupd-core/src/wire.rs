//! Newline-delimited JSON framing for running the protocol over a byte
//! stream. Each frame is decoded exactly once here into the closed protocol
//! types; a line that does not decode is logged and skipped.

use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::error::CallError;
use crate::method::MethodCall;
use crate::question::AnswerCode;
use crate::signal::SignalEnvelope;

/// Longest line accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "kebab-case")]
pub enum ClientFrame {
    Call { serial: u64, call: MethodCall },
    Answer { serial: u64, code: AnswerCode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "kebab-case")]
pub enum WorkerFrame {
    /// First frame on a connection: the caller name assigned by the worker.
    Welcome {
        name: String,
    },
    Reply {
        serial: u64,
        result: Result<(), CallError>,
    },
    Signal(SignalEnvelope),
}

pub fn encode_frame<T: Serialize>(frame: &T) -> serde_json::Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(frame)?;
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode_frame(frame).map_err(io::Error::other)?;
    writer.write_all(&encoded).await?;
    writer.flush().await
}

pub struct FrameReader<R> {
    reader: R,
    line: String,
    peer: String,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, peer: impl Into<String>) -> Self {
        Self {
            reader,
            line: String::new(),
            peer: peer.into(),
        }
    }

    /// Next well-formed frame, or `None` once the peer closes the stream.
    pub async fn next<T: DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line).await?;
            if read == 0 {
                return Ok(None);
            }
            if self.line.len() > MAX_FRAME_LEN {
                warn!(peer = %self.peer, len = self.line.len(), "skipping oversized frame");
                continue;
            }
            if self.line.trim().is_empty() {
                continue;
            }
            match decode_frame(&self.line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "skipping undecodable frame");
                }
            }
        }
    }
}
