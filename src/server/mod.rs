//! Real-time broadcast layer.
//!
//! One WebSocket endpoint that forwards every hub event to all connected
//! clients, and accepts raw button events and gesture training over the
//! same connection. The wider REST surface lives elsewhere; this server
//! only exposes the event stream plus a health and state probe.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::Track;
use crate::events::{EventBus, HubEvent};
use crate::gesture::GestureRecognizer;
use crate::gesture::TimedEvent;
use crate::mood::{self, AudioFeatures, StructuralSegment};
use crate::tracker::{BeatTracker, TrackerSnapshot};

#[derive(Clone)]
pub struct ServerState {
    pub bus: EventBus,
    pub tracker: Arc<BeatTracker>,
    pub recognizer: Arc<GestureRecognizer>,
}

/// Messages clients may send over the WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    ButtonEvent { device_id: String, event: Value },
    #[serde(rename_all = "camelCase")]
    TrainGesture {
        device_id: String,
        name: String,
        events: Vec<TimedEvent>,
    },
    /// Now-playing push from the music collaborator, with the track's
    /// audio features when it has them.
    #[serde(rename_all = "camelCase")]
    NowPlaying {
        track: Option<Track>,
        #[serde(default)]
        features: Option<AudioFeatures>,
        #[serde(default)]
        segments: Option<Vec<StructuralSegment>>,
    },
}

pub async fn run_server(state: ServerState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/state", get(tracker_state))
        .route("/v1/ws", get(ws_handler))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn tracker_state(State(state): State<ServerState>) -> Json<TrackerSnapshot> {
    Json(state.tracker.current_state())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    debug!("WebSocket client connected");
    let rx = state.bus.subscribe();
    let (ws_sink, ws_stream) = socket.split();

    let outgoing_handle = tokio::spawn(forward_events(ws_sink, rx));
    process_incoming(ws_stream, &state).await;

    debug!("WebSocket client disconnected");
    outgoing_handle.abort();
}

/// Forward every hub event to the client as wire JSON.
async fn forward_events(
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: broadcast::Receiver<HubEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event.to_wire()) {
                Ok(json) => {
                    if ws_sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("WebSocket client lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn process_incoming(
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    state: &ServerState,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, state),
                Err(e) => debug!("Failed to parse client message: {}", e),
            },
            Ok(Message::Binary(_)) => debug!("Received binary message, ignoring"),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        }
    }
}

fn handle_client_message(msg: ClientMessage, state: &ServerState) {
    match msg {
        ClientMessage::ButtonEvent { device_id, event } => {
            match state.recognizer.process_raw_event(&device_id, &event) {
                Ok(Some(gesture)) => debug!("Matched gesture '{}'", gesture.pattern),
                Ok(None) => {}
                Err(e) => warn!("Rejected button event from {}: {}", device_id, e),
            }
        }
        ClientMessage::TrainGesture {
            device_id,
            name,
            events,
        } => match state.recognizer.train_pattern(&device_id, &name, &events) {
            Ok(pattern) => info!("Trained pattern '{}'", pattern.name),
            Err(e) => warn!("Failed to train pattern '{}': {}", name, e),
        },
        ClientMessage::NowPlaying {
            track,
            features,
            segments,
        } => {
            state.bus.publish(HubEvent::NowPlayingChanged { track });
            if let Some(features) = features {
                let result = mood::classify(&features, segments.as_deref());
                info!(
                    "Classified mood '{}' at confidence {:.2}",
                    result.mood, result.confidence
                );
                state.bus.publish(HubEvent::MoodChanged { mood: result.mood });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GestureSettings, TrackerSettings};
    use crate::events::drain_ready;
    use crate::gesture::ButtonEventType;
    use crate::mood::Mood;

    fn test_state(bus: &EventBus) -> ServerState {
        ServerState {
            bus: bus.clone(),
            tracker: Arc::new(BeatTracker::new(bus.clone(), &TrackerSettings::default())),
            recognizer: Arc::new(GestureRecognizer::new(
                bus.clone(),
                &GestureSettings::default(),
            )),
        }
    }

    #[tokio::test]
    async fn now_playing_push_classifies_and_publishes() {
        let bus = EventBus::new(64);
        let state = test_state(&bus);
        let mut rx = bus.subscribe();

        let msg: ClientMessage = serde_json::from_str(
            r#"{
                "type": "nowPlaying",
                "track": {"id": "t1", "title": "Song", "artist": "Band", "duration": 180.0},
                "features": {
                    "energy": 0.9, "valence": 0.8, "danceability": 0.5,
                    "acousticness": 0.1, "instrumentalness": 0.0
                }
            }"#,
        )
        .unwrap();
        handle_client_message(msg, &state);

        let events = drain_ready(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, HubEvent::NowPlayingChanged { track: Some(t) } if t.id == "t1")
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, HubEvent::MoodChanged { mood: Mood::Party })));
    }

    #[tokio::test]
    async fn now_playing_push_without_features_skips_classification() {
        let bus = EventBus::new(64);
        let state = test_state(&bus);
        let mut rx = bus.subscribe();

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "nowPlaying", "track": null}"#).unwrap();
        handle_client_message(msg, &state);

        let events = drain_ready(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, HubEvent::NowPlayingChanged { track: None })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, HubEvent::MoodChanged { .. })));
    }

    #[test]
    fn parses_button_event_message() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"buttonEvent","deviceId":"button-1","event":{"type":"press","timestamp":100}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ButtonEvent { device_id, event } => {
                assert_eq!(device_id, "button-1");
                assert_eq!(event["type"], "press");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parses_train_gesture_message() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{
                "type": "trainGesture",
                "deviceId": "button-1",
                "name": "knock",
                "events": [
                    {"type": "press", "timestamp": 0},
                    {"type": "release", "timestamp": 300}
                ]
            }"#,
        )
        .unwrap();
        match msg {
            ClientMessage::TrainGesture { name, events, .. } => {
                assert_eq!(name, "knock");
                assert_eq!(events.len(), 2);
                assert_eq!(events[1].event_type, ButtonEventType::Release);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
