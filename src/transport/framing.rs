//! Content-Length message framing.
//!
//! Each JSON-RPC message is preceded by an HTTP-style header block, the same
//! framing LSP uses:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are case-insensitive and both CRLF and LF line endings are
//! accepted.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single message body (100MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Read one framed message body.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF)
/// - No Content-Length header is found
/// - Content-Length exceeds [`MAX_MESSAGE_SIZE`]
/// - The body cannot be read completely or is not valid UTF-8
pub async fn read_message<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    // Headers run until the first blank line.
    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;

        if bytes_read == 0 {
            return Err(anyhow!("Connection closed by peer"));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
            // Other headers (e.g. Content-Type) are ignored.
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    // The body is exactly Content-Length bytes with no terminator.
    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    String::from_utf8(body).context("Message body is not valid UTF-8")
}

/// Write one framed message and flush.
///
/// The header carries the body length in bytes, not characters.
///
/// # Errors
///
/// Returns an error if writing or flushing the underlying stream fails.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write message header")?;
    writer
        .write_all(body.as_bytes())
        .await
        .context("Failed to write message body")?;
    writer.flush().await.context("Failed to flush message")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, BufReader};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut client, server) = duplex(1024);
        let message = r#"{"jsonrpc":"2.0","method":"Full.Add","params":[2,3],"id":1}"#;

        write_message(&mut client, message).await.expect("Write failed");

        let mut reader = BufReader::new(server);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_back_to_back_messages() {
        let (mut client, server) = duplex(1024);
        write_message(&mut client, r#"{"id":1}"#).await.unwrap();
        write_message(&mut client, r#"{"id":2}"#).await.unwrap();

        let mut reader = BufReader::new(server);
        assert_eq!(read_message(&mut reader).await.unwrap(), r#"{"id":1}"#);
        assert_eq!(read_message(&mut reader).await.unwrap(), r#"{"id":2}"#);
    }

    #[tokio::test]
    async fn test_lf_endings_and_lowercase_header() {
        let (mut client, server) = duplex(1024);
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\nContent-Type: application/json\n\n{}", body.len(), body);
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(server);
        let received = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .expect("Read failed");
        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let (mut client, server) = duplex(1024);
        client.write_all(b"\r\n").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let err = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .unwrap_err();
        assert!(
            err.to_string().contains("Missing Content-Length"),
            "Expected 'Missing Content-Length' error, got: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_rejects_oversized_message() {
        let (mut client, server) = duplex(1024);
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        client.write_all(raw.as_bytes()).await.unwrap();

        let mut reader = BufReader::new(server);
        let err = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        let (client, server) = duplex(1024);
        drop(client);

        let mut reader = BufReader::new(server);
        let err = timeout(TEST_TIMEOUT, read_message(&mut reader))
            .await
            .expect("Test timed out")
            .unwrap_err();
        assert!(err.to_string().contains("closed"), "got: {}", err);
    }
}
