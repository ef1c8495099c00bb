//! Helpers shared by the unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// HTTP server that drops the first `failures` connections after reading the
/// request, then answers every later one with `200 OK` and a fixed body.
pub struct FlakyServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FlakyServer {
    pub async fn start(failures: usize, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    if seen > failures {
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FlakyServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// HTTP server that sends the headers and half of a 64-byte body, then holds
/// the connection open until the client hangs up.
pub struct StallServer {
    addr: SocketAddr,
    stalled: Arc<Notify>,
    closed: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl StallServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stalled = Arc::new(Notify::new());
        let closed = Arc::new(Notify::new());
        let (on_stall, on_close) = (stalled.clone(), closed.clone());

        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let on_stall = on_stall.clone();
                let on_close = on_close.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let head = "HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\n";
                    if socket.write_all(head.as_bytes()).await.is_err()
                        || socket.write_all(&[b'x'; 32]).await.is_err()
                    {
                        return;
                    }
                    let _ = socket.flush().await;
                    on_stall.notify_one();
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                    on_close.notify_one();
                });
            }
        });

        Self {
            addr,
            stalled,
            closed,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// True once a response has been left half-sent.
    pub async fn stalled(&self) -> bool {
        timeout(WAIT_LIMIT, self.stalled.notified()).await.is_ok()
    }

    /// True once the client has dropped a stalled connection.
    pub async fn closed(&self) -> bool {
        timeout(WAIT_LIMIT, self.closed.notified()).await.is_ok()
    }
}

impl Drop for StallServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Polls `condition` until it holds or the wait limit passes.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
