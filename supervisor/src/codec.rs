//! Outbound framing for the worker's stdin.
//!
//! Language servers expect `Content-Length: N\r\n\r\n{json}` framing; simpler
//! line-protocol workers take one JSON document per line. [`FrameWriter`]
//! serialises a message and writes it with either framing.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// How messages are delimited on the outbound wire channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFraming {
    /// `Content-Length: N\r\n\r\n` header followed by the body.
    #[default]
    ContentLength,
    /// Body followed by `\n`.
    Newline,
}

/// Writes framed JSON messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
    framing: WireFraming,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, framing: WireFraming) -> Self {
        Self { writer, framing }
    }

    /// Write one message and flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(msg).context("serializing wire message")?;

        match self.framing {
            WireFraming::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                self.writer
                    .write_all(header.as_bytes())
                    .await
                    .context("writing frame header")?;
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing frame body")?;
            }
            WireFraming::Newline => {
                self.writer
                    .write_all(body.as_bytes())
                    .await
                    .context("writing message")?;
                self.writer
                    .write_all(b"\n")
                    .await
                    .context("writing message terminator")?;
            }
        }
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }

    /// Flush and shut down the underlying writer, closing the stream.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await.context("closing wire channel")
    }
}
