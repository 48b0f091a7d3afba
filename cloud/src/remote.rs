use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use booth_common::config::Config;
use booth_common::state::{BoothState, CaptureMode, FilterKind};

static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Broadcast event name the control page sends.
const COMMAND_EVENT: &str = "command";

/// State change requested by a remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    SetFilter(FilterKind),
    SetMode(CaptureMode),
}

impl RemoteCommand {
    pub fn apply(self, state: &BoothState) {
        match self {
            RemoteCommand::SetFilter(filter) => state.set_filter(filter),
            RemoteCommand::SetMode(mode) => state.set_mode(mode),
        }
    }
}

/// Phoenix channel envelope (protocol vsn 1.0.0).
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Parse the inner broadcast payload `{type, filter|mode}`.
///
/// Values are uppercased and checked against the closed filter and mode
/// sets; anything else is rejected.
pub fn parse_command(payload: &serde_json::Value) -> Result<RemoteCommand, RemoteError> {
    let kind = payload
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(RemoteError::MissingField("type"))?
        .to_ascii_uppercase();

    match kind.as_str() {
        "SET_FILTER" => {
            let raw = payload
                .get("filter")
                .and_then(|v| v.as_str())
                .ok_or(RemoteError::MissingField("filter"))?;
            FilterKind::parse(raw)
                .map(RemoteCommand::SetFilter)
                .ok_or_else(|| RemoteError::InvalidValue(raw.to_string()))
        }
        "SET_MODE" => {
            let raw = payload
                .get("mode")
                .and_then(|v| v.as_str())
                .ok_or(RemoteError::MissingField("mode"))?;
            CaptureMode::parse(raw)
                .map(RemoteCommand::SetMode)
                .ok_or_else(|| RemoteError::InvalidValue(raw.to_string()))
        }
        _ => Err(RemoteError::UnknownType(kind)),
    }
}

/// Extract a command from a raw socket frame. Returns `None` for protocol
/// traffic (join replies, heartbeats, presence) and for broadcasts of other
/// events.
pub fn parse_frame(text: &str) -> Option<Result<RemoteCommand, RemoteError>> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => return Some(Err(RemoteError::Json(e))),
    };
    if envelope.event != "broadcast" {
        debug!(topic = %envelope.topic, event = %envelope.event, "realtime protocol message");
        return None;
    }
    if envelope.payload.get("event").and_then(|v| v.as_str()) != Some(COMMAND_EVENT) {
        return None;
    }
    let inner = envelope.payload.get("payload")?;
    Some(parse_command(inner))
}

/// `https://x` → `wss://x/realtime/v1/websocket?apikey=<key>&vsn=1.0.0`
pub fn websocket_url(base: &str, key: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/realtime/v1/websocket?apikey={key}&vsn=1.0.0")
}

fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

fn join_message(topic: &str) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "phx_join",
        "payload": { "config": { "broadcast": { "self": false } } },
        "ref": next_ref(),
    })
    .to_string()
}

fn heartbeat_message() -> String {
    serde_json::json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": next_ref(),
    })
    .to_string()
}

/// Listens on the realtime broadcast channel and writes accepted commands
/// into the shared [`BoothState`].
pub struct RemoteControl {
    url: String,
    topic: String,
    heartbeat: Duration,
    state: Arc<BoothState>,
}

impl RemoteControl {
    pub fn new(config: &Config, state: Arc<BoothState>) -> Self {
        Self {
            url: websocket_url(&config.cloud.url, &config.cloud.key),
            topic: format!("realtime:{}", config.remote.channel),
            heartbeat: Duration::from_secs(config.remote.heartbeat_secs.max(1)),
            state,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Reconnects with exponential backoff for the life of the process.
    pub async fn run(&self) {
        let mut backoff = Duration::from_secs(2);
        let max_backoff = Duration::from_secs(30);

        loop {
            info!(topic = %self.topic, "connecting to realtime channel");
            match self.session().await {
                Ok(()) => {
                    info!("realtime channel closed, reconnecting");
                    backoff = Duration::from_secs(2);
                }
                Err(e) => {
                    error!(error = %e, "realtime channel error, reconnecting in {:?}", backoff);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    async fn session(&self) -> Result<(), RemoteError> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RemoteError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        sink.send(Message::Text(join_message(&self.topic)))
            .await
            .map_err(|e| RemoteError::Socket(e.to_string()))?;
        info!(topic = %self.topic, "joined realtime channel");

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sink.send(Message::Text(heartbeat_message()))
                        .await
                        .map_err(|e| RemoteError::Socket(e.to_string()))?;
                }
                msg = source.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    match msg.map_err(|e| RemoteError::Socket(e.to_string()))? {
                        Message::Text(text) => self.handle_text(&text),
                        Message::Ping(data) => {
                            sink.send(Message::Pong(data))
                                .await
                                .map_err(|e| RemoteError::Socket(e.to_string()))?;
                        }
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Some(Ok(command)) => {
                info!(?command, "remote command received");
                command.apply(&self.state);
            }
            Some(Err(e)) => warn!(error = %e, "rejected remote command"),
            None => {}
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("malformed realtime message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command payload missing field {0:?}")]
    MissingField(&'static str),
    #[error("unknown command type {0:?}")]
    UnknownType(String),
    #[error("invalid value {0:?}")]
    InvalidValue(String),
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Socket(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broadcast(inner: serde_json::Value) -> String {
        json!({
            "topic": "realtime:booth_control",
            "event": "broadcast",
            "payload": { "type": "broadcast", "event": "command", "payload": inner },
            "ref": null
        })
        .to_string()
    }

    #[test]
    fn filter_and_mode_commands() {
        assert_eq!(
            parse_command(&json!({"type": "SET_FILTER", "filter": "neon"})).unwrap(),
            RemoteCommand::SetFilter(FilterKind::Neon)
        );
        assert_eq!(
            parse_command(&json!({"type": "set_mode", "mode": "Gif"})).unwrap(),
            RemoteCommand::SetMode(CaptureMode::Gif)
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            parse_command(&json!({"type": "SET_FILTER", "filter": "sparkle"})),
            Err(RemoteError::InvalidValue(_))
        ));
        assert!(matches!(
            parse_command(&json!({"type": "SET_MODE"})),
            Err(RemoteError::MissingField("mode"))
        ));
        assert!(matches!(
            parse_command(&json!({"type": "REBOOT"})),
            Err(RemoteError::UnknownType(_))
        ));
    }

    #[test]
    fn frames_are_filtered_by_event() {
        let frame = broadcast(json!({"type": "SET_FILTER", "filter": "RETRO"}));
        assert_eq!(
            parse_frame(&frame).unwrap().unwrap(),
            RemoteCommand::SetFilter(FilterKind::Retro)
        );

        let reply = json!({"topic": "phoenix", "event": "phx_reply", "payload": {"status": "ok"}, "ref": "1"});
        assert!(parse_frame(&reply.to_string()).is_none());

        let other = json!({
            "topic": "realtime:booth_control",
            "event": "broadcast",
            "payload": {"type": "broadcast", "event": "chat", "payload": {}}
        });
        assert!(parse_frame(&other.to_string()).is_none());

        assert!(matches!(parse_frame("not json"), Some(Err(RemoteError::Json(_)))));
    }

    #[test]
    fn rejected_command_leaves_state_unchanged() {
        let state = BoothState::new();
        let control = RemoteControl {
            url: String::new(),
            topic: "realtime:test".into(),
            heartbeat: Duration::from_secs(25),
            state: Arc::new(state),
        };
        control.handle_text(&broadcast(json!({"type": "SET_MODE", "mode": "BURST"})));
        control.handle_text(&broadcast(json!({"type": "SET_MODE", "mode": "VIDEO"})));
        assert_eq!(control.state.mode(), CaptureMode::Burst);
    }

    #[test]
    fn websocket_url_from_https_base() {
        assert_eq!(
            websocket_url("https://abc.supabase.co/", "anon"),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert!(websocket_url("http://localhost:54321", "k").starts_with("ws://localhost:54321/"));
    }
}
