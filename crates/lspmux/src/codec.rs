//! `Content-Length`-framed JSON-RPC reading and writing.
//!
//! Messages on the wire look like:
//!
//! ```text
//! Content-Length: 73\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}
//! ```
//!
//! Extra headers before the blank line are tolerated and ignored.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

const CONTENT_LENGTH: &str = "content-length";

/// Reads one framed JSON-RPC message from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream at a header boundary (no
/// partial header bytes read yet); any other truncation is an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_any_header_byte = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if saw_any_header_byte {
                return Err(FramingError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended mid-header",
                )));
            }
            return Ok(None);
        }
        saw_any_header_byte = true;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(trimmed.to_string()))?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let value = value.trim();
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
            );
        }
    }

    let content_length = content_length.ok_or(FramingError::MissingContentLength)?;
    let mut body = vec![0u8; content_length];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body).await?;
    let text = String::from_utf8(body)?;
    let value: Value = serde_json::from_str(&text)?;
    Ok(Some(value))
}

/// Serializes `message` and writes it as a single framed block, then flushes.
///
/// Callers must serialize writes to a single output stream themselves;
/// interleaving two in-flight `write_message` calls on the same writer
/// corrupts the frame boundary.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
