//! # Project Test Support
//!
//! An in-process HTTP server speaking just enough HTTP/1.1 to play a status
//! stream endpoint. Each accepted connection consumes the next scripted
//! [`Reply`]; once the script runs out the last reply repeats.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the server answers one connection.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A plain HTTP error with an empty body.
    Status(u16),
    /// A `text/event-stream` response with the given raw frames.
    Events {
        /// Frames written right after the headers, e.g. `"event: status\ndata: {}\n\n"`.
        frames: Vec<String>,
        /// Keep the connection open afterwards instead of closing it.
        hold: bool,
    },
}

/// Formats one SSE frame.
pub fn frame(event: &str, data: &str) -> String {
    let mut out = format!("event: {}\n", event);
    for line in data.lines() {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// A status payload for `monitor` in the dashboard's wire shape.
pub fn status_json(monitor: i64, status: &str, response_time: u64) -> String {
    serde_json::json!({
        "monitor_id": monitor,
        "status": status,
        "response_time": response_time,
        "timestamp": "2024-05-01T00:00:00Z",
    })
    .to_string()
}

/// Scripted SSE endpoint bound to `127.0.0.1`.
pub struct MockSseServer {
    base: String,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    accept_loop: JoinHandle<()>,
}

impl MockSseServer {
    /// Binds an ephemeral port and starts serving `script`.
    pub async fn start(script: Vec<Reply>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_loop = {
            let connections = Arc::clone(&connections);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let n = connections.fetch_add(1, Ordering::SeqCst);
                    let reply = script
                        .get(n)
                        .or_else(|| script.last())
                        .cloned()
                        .unwrap_or(Reply::Status(404));
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        if let Err(e) = serve(socket, reply, requests).await {
                            eprintln!("mock connection {} failed: {}", n, e);
                        }
                    });
                }
            })
        };

        Ok(Self {
            base,
            connections,
            requests,
            accept_loop,
        })
    }

    /// `http://127.0.0.1:<port>` followed by `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Raw request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

impl Drop for MockSseServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(mut socket: TcpStream, reply: Reply, requests: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < 16 * 1024 {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }
    requests
        .lock()
        .expect("requests lock poisoned")
        .push(String::from_utf8_lossy(&head).into_owned());

    match reply {
        Reply::Status(status) => {
            let response = format!(
                "HTTP/1.1 {} Mock\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            socket.write_all(response.as_bytes()).await?;
        }
        Reply::Events { frames, hold } => {
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
                )
                .await?;
            for frame in frames {
                socket.write_all(frame.as_bytes()).await?;
                socket.flush().await?;
            }
            if hold {
                // Park until the client goes away.
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        }
    }
    socket.shutdown().await.ok();
    Ok(())
}
