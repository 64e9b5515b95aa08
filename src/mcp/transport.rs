//! Newline-delimited JSON framing.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! Reading and writing are split into [`FramedReader`] and [`FramedWriter`]
//! so they can live on separate tasks. Both are generic over Tokio's I/O
//! traits, which lets tests drive a whole session through in-memory pipes.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One line read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 line with its terminator stripped.
    Text(String),
    /// A line that is not valid UTF-8. Holds its length in bytes.
    Malformed(usize),
}

/// Reads one message per line.
#[derive(Debug)]
pub struct FramedReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FramedReader<R> {
    /// Wraps a buffered reader.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `None` at end of input. Invalid UTF-8 is reported as
    /// [`Frame::Malformed`] so the caller can answer it and keep reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    pub async fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        self.buffer.clear();
        let bytes_read = self.reader.read_until(b'\n', &mut self.buffer).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let mut line = self.buffer.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest.strip_suffix(b"\r").unwrap_or(rest);
        }

        Ok(Some(match std::str::from_utf8(line) {
            Ok(text) => Frame::Text(text.to_string()),
            Err(_) => Frame::Malformed(line.len()),
        }))
    }
}

/// Writes one message per line, flushing after each.
#[derive(Debug)]
pub struct FramedWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes an already encoded message with newline termination.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn write_raw(&mut self, json: &str) -> io::Result<()> {
        // One message per line.
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// Encodes a message as a single line of JSON.
///
/// # Errors
///
/// Returns an error if serialisation fails.
pub fn encode<T: Serialize>(message: &T) -> io::Result<String> {
    serde_json::to_string(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Reader half bound to the process's stdin.
pub type StdinReader = FramedReader<BufReader<tokio::io::Stdin>>;

/// Writer half bound to the process's stdout.
pub type StdoutWriter = FramedWriter<tokio::io::Stdout>;

/// Returns framed halves over stdin and stdout.
#[must_use]
pub fn stdio() -> (StdinReader, StdoutWriter) {
    (
        FramedReader::new(BufReader::new(tokio::io::stdin())),
        FramedWriter::new(tokio::io::stdout()),
    )
}
