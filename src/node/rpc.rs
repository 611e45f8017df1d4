//! Minimal request/response transport: a strict-framing HTTP/1.1 subset over
//! TCP. One request per connection, `Connection: close` on both sides, and a
//! reason phrase that is always the literal "OK" (clients must ignore it).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::common::{Error, Result};

/// Upper bound on the header section of an inbound request.
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// Outcome of a client call. `status` 0 means the call failed before a
/// well-formed response arrived (connect, send, receive or parse failure) and
/// is distinct from any HTTP code.
#[derive(Debug, Default)]
pub struct RpcReply {
    pub status: u16,
    pub body: String,
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read one framed request: headers up to `\r\n\r\n` (capped at 1 MiB), then
/// exactly `Content-Length` body bytes. Any framing violation is an error and
/// the caller closes the connection without a response.
pub async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(end) = find_header_end(&data) {
            if end > MAX_HEADER_BYTES {
                return Err(Error::Protocol("header section exceeds 1 MiB".into()));
            }
            break end;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(Error::Protocol("header section exceeds 1 MiB".into()));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before headers".into()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let header = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = header.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    if method.is_empty() || path.is_empty() {
        return Err(Error::Protocol("malformed request line".into()));
    }

    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| Error::Protocol("invalid content-length".into()))?;
        }
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let want = (content_length - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::Protocol("connection closed before body".into()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(Request { method, path, body })
}

pub async fn write_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let wire = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.body.len(),
        response.body,
    );
    stream.write_all(wire.as_bytes()).await?;
    Ok(())
}

/// Issue one `POST` with a hard deadline covering connect, send and receive.
/// Reads to EOF (the server closes after one response) and parses the status
/// line; everything after the header separator is the body.
pub async fn post(host: &str, port: u16, path: &str, body: &str, deadline: Duration) -> RpcReply {
    match tokio::time::timeout(deadline, post_inner(host, port, path, body)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(error)) => {
            debug!(%host, port, path, %error, "rpc call failed");
            RpcReply::default()
        }
        Err(_) => {
            debug!(%host, port, path, timeout_ms = deadline.as_millis() as u64, "rpc call timed out");
            RpcReply::default()
        }
    }
}

async fn post_inner(host: &str, port: u16, path: &str, body: &str) -> Result<RpcReply> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Connection(format!("{host}:{port}: {e}")))?;

    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {host}:{port}\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(request.as_bytes()).await?;

    let mut data = Vec::new();
    stream.read_to_end(&mut data).await?;

    let header_end =
        find_header_end(&data).ok_or_else(|| Error::Protocol("response missing header separator".into()))?;
    let header = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let status_line = header.split("\r\n").next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::Protocol(format!("bad status line: {status_line}")))?;

    let body = String::from_utf8_lossy(&data[header_end + 4..]).into_owned();
    Ok(RpcReply { status, body })
}
