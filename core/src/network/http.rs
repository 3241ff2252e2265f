//! Minimal HTTP/1.1 plumbing
//!
//! Just enough protocol support for the snode endpoints, the daemon RPC
//! client, and the peer request client. Connections are one request per
//! connection (`Connection: close`), which keeps parsing to headers plus a
//! `Content-Length` body.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Hard cap on any request or response we are willing to buffer.
pub const MAX_HTTP_BODY: usize = 2 * 1024 * 1024;

/// A parsed HTTP request or response head plus body.
#[derive(Debug)]
pub struct HttpMessage {
    /// Request: "POST /path"; response: status code in `status`
    pub method: String,
    pub target: String,
    pub status: u16,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Find the end of HTTP headers (position after \r\n\r\n or \n\n)
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(3) {
        if &data[i..i + 4] == b"\r\n\r\n" {
            return Some(i + 4);
        }
    }
    for i in 0..data.len().saturating_sub(1) {
        if &data[i..i + 2] == b"\n\n" {
            return Some(i + 2);
        }
    }
    None
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

fn parse_head(head: &str, headers: HashMap<String, String>, body: Vec<u8>) -> Option<HttpMessage> {
    let first = head.lines().next()?;
    let mut parts = first.split_whitespace();
    let a = parts.next()?.to_string();
    let b = parts.next()?.to_string();

    if a.starts_with("HTTP/") {
        // Response line: HTTP/1.1 200 OK
        let status = b.parse().ok()?;
        Some(HttpMessage {
            method: String::new(),
            target: String::new(),
            status,
            headers,
            body,
        })
    } else {
        Some(HttpMessage {
            method: a,
            target: b,
            status: 0,
            headers,
            body,
        })
    }
}

/// Read one complete HTTP message (request or response) from a stream.
///
/// Responses without a `Content-Length` are read to EOF.
pub async fn read_message(stream: &mut TcpStream) -> std::io::Result<HttpMessage> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    // Headers first
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "headers too large",
            ));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before headers",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let headers = parse_headers(&head);

    let content_length: Option<usize> = headers
        .get("content-length")
        .and_then(|v| v.parse().ok());

    let mut body = buf[header_end..].to_vec();
    match content_length {
        Some(len) => {
            if len > MAX_HTTP_BODY {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "body too large",
                ));
            }
            while body.len() < len {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-body",
                    ));
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        None => {
            if head.starts_with("HTTP/") {
                // Response without Content-Length: read to EOF
                loop {
                    if body.len() > MAX_HTTP_BODY {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "body too large",
                        ));
                    }
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    body.extend_from_slice(&chunk[..n]);
                }
            } else {
                // Request without Content-Length carries no body
                body.clear();
            }
        }
    }

    parse_head(&head, headers, body).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed http head")
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        406 => "Not Acceptable",
        421 => "Misdirected Request",
        429 => "Too Many Requests",
        432 => "Invalid Proof Of Work",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        507 => "Insufficient Storage",
        _ => "Unknown",
    }
}

/// Serialize a response with optional extra headers.
pub fn build_response(status: u16, content_type: &str, extra: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        status_text(status),
        content_type,
        body.len(),
    )
    .into_bytes();
    for (name, value) in extra {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Serialize a request with optional extra headers.
pub fn build_request(method: &str, target: &str, extra: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "{} {} HTTP/1.1\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n",
        method,
        target,
        body.len(),
    )
    .into_bytes();
    for (name, value) in extra {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// POST to `ip:port`, returning the parsed response.
pub async fn post(
    ip: &str,
    port: u16,
    target: &str,
    extra_headers: &[(String, String)],
    body: &[u8],
) -> std::io::Result<HttpMessage> {
    let mut stream = TcpStream::connect((ip, port)).await?;
    let request = build_request("POST", target, extra_headers, body);
    stream.write_all(&request).await?;
    read_message(&mut stream).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\n\nbody"), Some(16));
        assert_eq!(find_header_end(b"partial"), None);
    }

    #[test]
    fn test_parse_request_head() {
        let head = "POST /swarms/push_batch/v1 HTTP/1.1\r\nContent-Length: 4\r\nX-Haven-Snode-Signature: abc\r\n";
        let headers = parse_headers(head);
        let msg = parse_head(head, headers, b"body".to_vec()).unwrap();
        assert_eq!(msg.method, "POST");
        assert_eq!(msg.target, "/swarms/push_batch/v1");
        assert_eq!(msg.header("x-haven-snode-signature"), Some("abc"));
    }

    #[test]
    fn test_parse_response_head() {
        let head = "HTTP/1.1 421 Misdirected Request\r\nContent-Type: application/json\r\n";
        let headers = parse_headers(head);
        let msg = parse_head(head, headers, vec![]).unwrap();
        assert_eq!(msg.status, 421);
    }

    #[test]
    fn test_build_response_shape() {
        let bytes = build_response(200, "application/json", &[], b"{}");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2"));
        assert!(text.ends_with("{}"));
    }

    #[test]
    fn test_build_request_with_headers() {
        let extra = vec![("X-Haven-Long-Poll".to_string(), "1".to_string())];
        let bytes = build_request("POST", "/storage_rpc/v1", &extra, b"{}");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-Haven-Long-Poll: 1\r\n"));
        assert!(text.starts_with("POST /storage_rpc/v1 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_read_message_over_socket() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let msg = read_message(&mut stream).await.unwrap();
        assert_eq!(msg.status, 200);
        assert_eq!(msg.body, b"hello");
    }
}
