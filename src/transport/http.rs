//! Minimal HTTP/1.1 framing for the remote API
//!
//! One request per connection, bodies sized by `Content-Length`.

use crate::error::{Result, RuneError};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body either side will read
pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Path without the query string
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or("")
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.as_bytes().to_vec())
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        Ok(Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(serde_json::to_vec(value)?))
    }

    /// Error body carrying the exit code a client should end with
    pub fn error(status: u16, message: &str, exit_code: i32) -> Self {
        let body = serde_json::json!({
            "message": message,
            "exit_code": exit_code,
        });
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read one request; `None` when the peer closed before sending anything.
pub async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(None);
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(RuneError::Api(format!(
            "malformed request line: {:?}",
            request_line.trim()
        )));
    }

    let headers = read_headers(reader).await?;
    let body = read_body(reader, &headers).await?;
    Ok(Some(Request {
        method: parts[0].to_string(),
        path: parts[1].to_string(),
        headers,
        body,
    }))
}

/// Read one response
pub async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Response> {
    let mut status_line = String::new();
    if reader.read_line(&mut status_line).await? == 0 {
        return Err(RuneError::Api("connection closed before response".into()));
    }

    // "HTTP/1.1 200 OK"
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| RuneError::Api(format!("malformed status line: {:?}", status_line.trim())))?;

    let headers = read_headers(reader).await?;
    let body = read_body(reader, &headers).await?;
    Ok(Response {
        status,
        headers,
        body,
    })
}

async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(RuneError::Api("connection closed inside headers".into()));
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(headers)
}

async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &[(String, String)],
) -> Result<Vec<u8>> {
    let length = match find_header(headers, "content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RuneError::Api(format!("invalid Content-Length: {}", value)))?,
        None => 0,
    };
    if length > MAX_BODY_SIZE {
        return Err(RuneError::Api(format!("body too large: {} bytes", length)));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

pub async fn write_request<W: AsyncWrite + Unpin>(writer: &mut W, request: &Request) -> Result<()> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.path);
    for (name, value) in &request.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        request.body.len()
    ));

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&request.body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status,
        reason_phrase(response.status)
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await?;
    Ok(())
}
