use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{error::Error, worker::WorkerIdentity};

/// How telemetry bodies are posted to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EnvelopeMode {
    /// The record text is the request body, as-is.
    #[default]
    Raw,

    /// The record text is wrapped as `{"data": <text>}`.
    Wrapped,
}

impl FromStr for EnvelopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "wrapped" => Ok(Self::Wrapped),
            other => Err(format!("unknown envelope mode `{other}`")),
        }
    }
}

/// The backend metrics sink.
///
/// One of these is built at startup and shared by every session;
/// `reqwest::Client` is internally reference-counted, so clones are cheap
/// and concurrent posts need no coordination here.
#[derive(Debug, Clone)]
pub struct Backend {
    http: reqwest::Client,
    metrics_url: String,
    envelope: EnvelopeMode,
}

impl Backend {
    /// A sink posting to `metrics_url` with the given envelope.
    pub fn new(metrics_url: String, envelope: EnvelopeMode) -> Self {
        Self {
            http: reqwest::Client::new(),
            metrics_url,
            envelope,
        }
    }

    /// POST one telemetry record body. Transport errors and non-success
    /// statuses both surface as [`Error::Sink`].
    pub async fn post_metrics(&self, body: &str) -> Result<(), Error> {
        let request = match self.envelope {
            EnvelopeMode::Raw => self.http.post(&self.metrics_url).body(body.to_string()),
            EnvelopeMode::Wrapped => self
                .http
                .post(&self.metrics_url)
                .json(&serde_json::json!({ "data": body })),
        };

        request.send().await?.error_for_status()?;

        Ok(())
    }
}

/// One telemetry record on its way to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsReport {
    /// The session it belongs to.
    pub worker: WorkerIdentity,

    /// The raw record text, forwarded without reinterpretation.
    pub body: String,
}

/// Spawn the shared uploader task and return its input.
///
/// Sessions fire reports into the returned sender and move on; a failing
/// backend slows nothing down on the serial side and a failed POST is
/// logged, never retried here.
pub fn spawn_uploader(backend: Backend) -> mpsc::UnboundedSender<MetricsReport> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MetricsReport>();

    tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            if let Err(e) = backend.post_metrics(&report.body).await {
                warn!(worker = %report.worker, %e, "Metrics upload failed");
            }
        }
    });

    tx
}

/// One control update for one worker, as carried on the feed.
///
/// Both fields are optional on the wire; the relay validates presence and
/// drops updates missing either, with a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlUpdate {
    /// The control being updated, e.g. `pwm`.
    #[serde(rename = "controlKey")]
    pub key: Option<String>,

    /// The new value, e.g. `128`.
    #[serde(rename = "controlValue")]
    pub value: Option<String>,
}

impl ControlUpdate {
    /// Decode the `data` part of a feed frame.
    ///
    /// The feed historically delivered payloads as JSON-encoded strings;
    /// plain objects are what it does today. Both are accepted.
    pub fn from_data(data: &Value) -> Result<Self, serde_json::Error> {
        match data {
            Value::String(encoded) => serde_json::from_str(encoded),
            other => serde_json::from_value(other.clone()),
        }
    }
}

/// A feed frame: a topic plus its payload.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    data: Value,
}

/// The backend control feed.
///
/// One websocket connection is shared by all sessions; frames are routed
/// by topic (`control-update-{identity}`) to whichever session subscribed.
/// Updates for workers without a live session are dropped with a log line.
#[derive(Debug, Clone, Default)]
pub struct ControlFeed {
    routes: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ControlUpdate>>>>,
}

impl ControlFeed {
    /// Spawn the connection task and return the feed.
    ///
    /// The connection is retried every few seconds, forever; an
    /// unreachable backend costs control updates, never sessions.
    pub fn connect(url: String) -> Self {
        let feed = Self::default();
        let task_feed = feed.clone();

        tokio::spawn(async move {
            loop {
                let mut ws = match connect_async(url.as_str()).await {
                    Ok((ws, _response)) => ws,
                    Err(e) => {
                        warn!(%url, %e, "Control feed unavailable, retrying in 3 seconds");
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        continue;
                    }
                };

                info!(%url, "Control feed connected");

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(Message::Text(text)) => task_feed.route_frame(&text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(%e, "Control feed read error");
                            break;
                        }
                    }
                }

                warn!(%url, "Control feed disconnected, retrying in 3 seconds");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        });

        feed
    }

    /// Receive control updates for one worker.
    ///
    /// A later subscription for the same worker replaces the earlier one;
    /// at most one session per worker exists at a time.
    pub fn subscribe(&self, worker: &WorkerIdentity) -> mpsc::UnboundedReceiver<ControlUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.routes
            .lock()
            .unwrap()
            .insert(worker.control_topic(), tx);

        rx
    }

    /// Route one update to the session subscribed on `topic`, if any.
    pub fn dispatch(&self, topic: &str, update: ControlUpdate) {
        let mut routes = self.routes.lock().unwrap();

        match routes.get(topic) {
            Some(tx) => {
                if tx.send(update).is_err() {
                    // The session ended; forget its route.
                    routes.remove(topic);
                    debug!(%topic, "Session gone, route removed");
                }
            }
            None => debug!(%topic, "No session for update, dropping"),
        }
    }

    fn route_frame(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%e, "Undecodable control frame, dropping");
                return;
            }
        };

        match ControlUpdate::from_data(&frame.data) {
            Ok(update) => self.dispatch(&frame.event, update),
            Err(e) => warn!(event = %frame.event, %e, "Undecodable control payload, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn identity() -> WorkerIdentity {
        WorkerIdentity::parse(&"d".repeat(36)).unwrap()
    }

    #[test]
    fn envelope_mode_from_str() {
        assert_eq!("raw".parse::<EnvelopeMode>().unwrap(), EnvelopeMode::Raw);
        assert_eq!(
            "Wrapped".parse::<EnvelopeMode>().unwrap(),
            EnvelopeMode::Wrapped
        );
        assert!("enveloped".parse::<EnvelopeMode>().is_err());
    }

    #[test]
    fn update_from_object_data() {
        let data = json!({"controlKey": "pwm", "controlValue": "128"});
        let update = ControlUpdate::from_data(&data).unwrap();

        assert_eq!(update.key.as_deref(), Some("pwm"));
        assert_eq!(update.value.as_deref(), Some("128"));
    }

    #[test]
    fn update_from_string_encoded_data() {
        let data = json!(r#"{"controlKey": "pwm", "controlValue": "128"}"#);
        let update = ControlUpdate::from_data(&data).unwrap();

        assert_eq!(update.key.as_deref(), Some("pwm"));
        assert_eq!(update.value.as_deref(), Some("128"));
    }

    #[test]
    fn update_missing_fields_decodes_as_none() {
        let update = ControlUpdate::from_data(&json!({"controlKey": "pwm"})).unwrap();

        assert_eq!(update.key.as_deref(), Some("pwm"));
        assert_eq!(update.value, None);
    }

    #[tokio::test]
    async fn frames_route_to_the_subscribed_session() {
        let feed = ControlFeed::default();
        let id = identity();
        let mut rx = feed.subscribe(&id);

        let frame = json!({
            "event": id.control_topic(),
            "data": {"controlKey": "pwm", "controlValue": "128"},
        });
        feed.route_frame(&frame.to_string());

        let update = rx.recv().await.unwrap();
        assert_eq!(update.key.as_deref(), Some("pwm"));
        assert_eq!(update.value.as_deref(), Some("128"));
    }

    #[tokio::test]
    async fn frames_for_unknown_topics_are_dropped() {
        let feed = ControlFeed::default();
        let id = identity();
        let mut rx = feed.subscribe(&id);

        let frame = json!({
            "event": "control-update-somebody-else",
            "data": {"controlKey": "pwm", "controlValue": "128"},
        });
        feed.route_frame(&frame.to_string());

        // Nothing arrives for our session.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn garbage_frames_are_dropped_quietly() {
        let feed = ControlFeed::default();
        let id = identity();
        let mut rx = feed.subscribe(&id);

        feed.route_frame("not json");
        feed.route_frame(&json!({"event": id.control_topic(), "data": 7}).to_string());

        assert!(rx.try_recv().is_err());
    }
}
