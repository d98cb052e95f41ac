//! Minimal canned-response HTTP server for exercising the reqwest-based collaborators
//! without network access.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A canned response served to exactly one connection.
pub(crate) struct Canned {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body: body.into(),
        }
    }

    pub fn status(status: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }
}

/// Bind an ephemeral port and answer one request with `canned`.
///
/// Returns the base URL and a handle resolving to the raw request text.
pub(crate) async fn serve_once(canned: Canned) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move { answer(&listener, canned).await });
    (format!("http://{addr}"), handle)
}

/// Like [`serve_once`], answering one connection per canned response in
/// order. The handle resolves to every raw request received.
pub(crate) async fn serve_sequence(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut requests = Vec::with_capacity(responses.len());
        for canned in responses {
            requests.push(answer(&listener, canned).await);
        }
        requests
    });
    (format!("http://{addr}"), handle)
}

async fn answer(listener: &TcpListener, canned: Canned) -> String {
    let (mut sock, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = sock.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + len {
                break;
            }
        }
    }

    let head = format!(
        "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        canned.status,
        canned.content_type,
        canned.body.len()
    );
    sock.write_all(head.as_bytes()).await.unwrap();
    sock.write_all(&canned.body).await.unwrap();
    let _ = sock.shutdown().await;
    String::from_utf8_lossy(&buf).into_owned()
}
