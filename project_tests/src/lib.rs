//! # Integration Test Support
//!
//! In-process stand-ins for the detection backend: a pull endpoint speaking
//! raw HTTP/1.1 and a push endpoint speaking WebSocket, plus telemetry
//! fixtures and polling helpers shared by the tests under `tests/`.

#![forbid(unsafe_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

/// A complete telemetry record as the backend would send it.
pub fn fixture_record() -> Value {
    json!({
        "timestamp": "2024-05-01T12:30:45Z",
        "system": {
            "power_mode": "active",
            "power_draw": 4.2,
            "battery_minutes": 310,
            "fps": 29.5,
            "camera_status": true,
            "timestamp": "2024-05-01T12:30:45Z"
        },
        "tracks": [{
            "id": 7,
            "zone": "restricted",
            "threat_score": 82.4,
            "threat_level": "high",
            "detection_time": 12.5,
            "behavior": {
                "loitering": true,
                "loitering_duration": 40,
                "speed_anomaly": false,
                "trajectory_stability": "erratic",
                "trajectory_confidence": 0.71
            },
            "prediction": {
                "near_term": "approaching fence",
                "medium_term": "entering restricted zone",
                "far_term": "unknown",
                "confidence": 0.62,
                "will_enter_restricted": true
            },
            "explanation": [{"factor": "zone", "points": 35}]
        }],
        "alerts": [{
            "id": "A-1",
            "time": "12:30:40",
            "message": "Intruder near north fence",
            "level": "warning"
        }],
        "video": {
            "live": true,
            "resolution": {"width": 1280, "height": 720},
            "latency_ms": 85,
            "source": "rtsp"
        }
    })
}

/// `{ success: true, data: record }` as served by the pull endpoint.
pub fn pull_body(record: &Value) -> String {
    json!({
        "success": true,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "data": record,
        "version": "1.0"
    })
    .to_string()
}

/// Polls `check` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind probe port");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);
    port
}

fn spawn_accept_loop<F, Fut>(listener: TcpListener, handler: F) -> JoinHandle<()>
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handler(stream));
        }
    })
}

#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    body: String,
}

/// Pull endpoint. Every request gets the current canned reply; requests are
/// recorded as raw header blocks.
pub struct MockPullServer {
    addr: SocketAddr,
    reply: Arc<Mutex<Reply>>,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl MockPullServer {
    pub async fn start(status: u16, body: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind pull server");
        let addr = listener.local_addr().expect("pull server addr");
        let reply = Arc::new(Mutex::new(Reply { status, body }));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (r, q) = (Arc::clone(&reply), Arc::clone(&requests));
        let task = spawn_accept_loop(listener, move |stream| {
            serve_http(stream, Arc::clone(&r), Arc::clone(&q))
        });
        Self { addr, reply, requests, task }
    }

    /// Serves `record` wrapped in a successful envelope.
    pub async fn with_record(record: &Value) -> Self {
        Self::start(200, pull_body(record)).await
    }

    pub fn url(&self) -> String {
        format!("http://{}/api/telemetry", self.addr)
    }

    pub fn set_reply(&self, status: u16, body: String) {
        *self.reply.lock().unwrap() = Reply { status, body };
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockPullServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_http(mut stream: TcpStream, reply: Arc<Mutex<Reply>>, requests: Arc<Mutex<Vec<String>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    requests.lock().unwrap().push(String::from_utf8_lossy(&buf).into_owned());

    let Reply { status, body } = reply.lock().unwrap().clone();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        if status < 400 { "OK" } else { "Error" },
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Push endpoint. Each connection receives the scripted frames in order and
/// is then held open; frames sent by the client are recorded.
pub struct MockPushServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl MockPushServer {
    pub async fn start(frames: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind push server");
        let addr = listener.local_addr().expect("push server addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let (r, c) = (Arc::clone(&received), Arc::clone(&connections));
        let task = spawn_accept_loop(listener, move |stream| {
            serve_ws(stream, frames.clone(), Arc::clone(&r), Arc::clone(&c))
        });
        Self { addr, received, connections, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

impl Drop for MockPushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_ws(
    stream: TcpStream,
    frames: Vec<String>,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    *connections.lock().unwrap() += 1;
    let (mut write, mut read) = ws.split();
    for frame in frames {
        if write.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => received.lock().unwrap().push(text.as_str().to_string()),
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// Bare TCP endpoint that never speaks HTTP or WebSocket. Every accepted
/// connection is counted.
pub struct RawListener {
    addr: SocketAddr,
    accepts: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl RawListener {
    /// Accepts and holds every connection open without writing a byte, like a
    /// hung backend.
    pub async fn stalled() -> Self {
        Self::start(true).await
    }

    /// Accepts every connection and closes it straight away, so handshakes fail.
    pub async fn rejecting() -> Self {
        Self::start(false).await
    }

    async fn start(hold: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind raw listener");
        let addr = listener.local_addr().expect("raw listener addr");
        let accepts = Arc::new(Mutex::new(0));

        let a = Arc::clone(&accepts);
        let task = spawn_accept_loop(listener, move |mut stream| {
            *a.lock().unwrap() += 1;
            async move {
                if hold {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                }
            }
        });
        Self { addr, accepts, task }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}/api/telemetry", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn accepts(&self) -> usize {
        *self.accepts.lock().unwrap()
    }
}

impl Drop for RawListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serialises one push frame.
pub fn push_frame(kind: &str, data: Value) -> String {
    json!({
        "type": kind,
        "timestamp": "2024-05-01T12:31:00Z",
        "data": data
    })
    .to_string()
}
