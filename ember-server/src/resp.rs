//! Line-oriented request/response framing: length-prefixed multi-bulk
//! requests in, typed replies out. Inline (whitespace-separated) commands are
//! accepted as well so the server can be driven from a plain telnet session.

use crate::error::{ServerError, ServerResult};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// A reply frame on its way to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
}

/// Reads one command from the connection. Returns `None` on a clean
/// connection close, `Some(args)` otherwise; `args[0]` is the verb.
pub async fn read_command<R>(
    reader: &mut BufReader<R>,
) -> ServerResult<Option<Vec<Vec<u8>>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let line = loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if !trimmed.is_empty() {
            break trimmed.to_string();
        }
    };

    if let Some(rest) = line.strip_prefix('*') {
        let count: usize = rest
            .parse()
            .map_err(|_| ServerError::Protocol(format!("invalid multibulk length '{}'", rest)))?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(read_bulk(reader).await?);
        }
        Ok(Some(args))
    } else {
        Ok(Some(
            line.split_whitespace()
                .map(|word| word.as_bytes().to_vec())
                .collect(),
        ))
    }
}

async fn read_bulk<R>(reader: &mut BufReader<R>) -> ServerResult<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header = String::new();
    let n = reader.read_line(&mut header).await?;
    if n == 0 {
        return Err(ServerError::Protocol(
            "unexpected end of stream inside a request".to_string(),
        ));
    }
    let header = header.trim_end_matches(['\r', '\n']);
    let Some(len) = header.strip_prefix('$') else {
        return Err(ServerError::Protocol(format!(
            "expected bulk length, got '{}'",
            header
        )));
    };
    let len: usize = len
        .parse()
        .map_err(|_| ServerError::Protocol(format!("invalid bulk length '{}'", len)))?;

    // Payload plus the trailing CRLF.
    let mut buf = vec![0u8; len + 2];
    reader.read_exact(&mut buf).await?;
    buf.truncate(len);
    Ok(buf)
}

/// Serializes a reply into `buf`.
pub fn encode_reply(reply: &Reply, buf: &mut Vec<u8>) {
    match reply {
        Reply::Simple(text) => {
            buf.push(b'+');
            buf.extend_from_slice(text.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(message) => {
            buf.push(b'-');
            buf.extend_from_slice(message.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Integer(value) => {
            buf.extend_from_slice(format!(":{}\r\n", value).as_bytes());
        }
        Reply::Bulk(bytes) => {
            buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Nil => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        Reply::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_reply(item, buf);
            }
        }
    }
}

pub async fn write_reply<W>(writer: &mut W, reply: &Reply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    encode_reply(reply, &mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await
}
