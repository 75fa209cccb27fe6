#![allow(dead_code)]

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Router,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

/// An in-process stand-in for the real backend: captures everything
/// POSTed to `/metrics` and pushes control frames to any websocket
/// connected to `/updates`.
pub struct TestBackend {
    base_url: String,

    /// Bodies of received metrics POSTs, in arrival order.
    pub metrics: mpsc::UnboundedReceiver<String>,

    control: broadcast::Sender<String>,
}

async fn receive_metrics(
    Extension(seen): Extension<mpsc::UnboundedSender<String>>,
    body: String,
) -> StatusCode {
    let _ = seen.send(body);

    StatusCode::OK
}

async fn serve_updates(
    ws: WebSocketUpgrade,
    Extension(control): Extension<broadcast::Sender<String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_updates(socket, control.subscribe()))
}

async fn push_updates(mut socket: WebSocket, mut frames: broadcast::Receiver<String>) {
    while let Ok(frame) = frames.recv().await {
        if socket.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }
}

impl TestBackend {
    /// Bind on an ephemeral port and start serving.
    pub async fn start() -> Self {
        let (metrics_tx, metrics_rx) = mpsc::unbounded_channel();
        let (control_tx, _) = broadcast::channel(64);

        let app = Router::new()
            .route("/metrics", post(receive_metrics))
            .route("/updates", get(serve_updates))
            .layer(Extension(metrics_tx))
            .layer(Extension(control_tx.clone()));

        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
            .serve(app.into_make_service());
        let addr = server.local_addr();

        tokio::spawn(server);

        Self {
            base_url: format!("http://{addr}"),
            metrics: metrics_rx,
            control: control_tx,
        }
    }

    /// Where metrics should be POSTed.
    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.base_url)
    }

    /// Where the control feed websocket lives.
    pub fn control_url(&self) -> String {
        format!(
            "{}/updates",
            self.base_url.replacen("http://", "ws://", 1)
        )
    }

    /// Push one control frame to every connected feed.
    pub fn push_control(&self, topic: &str, data: Value) {
        let frame = json!({ "event": topic, "data": data });

        let _ = self.control.send(frame.to_string());
    }

    /// Wait until at least one feed has connected to `/updates`.
    pub async fn feed_connected(&self) {
        while self.control.receiver_count() == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }
}

/// A fresh UUID-shaped worker identity (36 characters).
pub fn identity() -> String {
    uuid::Uuid::new_v4().to_string()
}
