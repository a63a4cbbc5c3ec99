//! Typed hub events and the broadcast bus that carries them.
//!
//! Every signal the core produces or reacts to travels as a [`HubEvent`]
//! over a [`tokio::sync::broadcast`] channel: tracker timeline events,
//! recognized gestures, mood / now-playing changes pushed by the music
//! collaborator, and the engine's own execution reports. Consumers (the
//! WebSocket broadcast layer, the engine's event loop) subscribe
//! independently and forward payloads verbatim.
//!
//! Wire payloads keep the camelCase field names of the published event
//! contract; see [`HubEvent::to_wire`].

use serde::Serialize;
use tokio::sync::broadcast;

use crate::analysis::{SectionType, Track};
use crate::engine::models::{ActionResult, Rule, Scene};
use crate::mood::Mood;

/// Payload for `trackingStarted`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStartedEvent {
    pub track: Track,
    pub total_beats: usize,
    pub total_sections: usize,
}

/// Payload for `paused` and `resumed`: the indices at the transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackMarkerEvent {
    pub current_beat: usize,
    pub current_section: usize,
}

/// Payload for `seeked`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekedEvent {
    /// Seek target in seconds.
    pub position: f64,
    pub current_beat: usize,
    pub current_section: usize,
}

/// Payload for `beat`. Emitted once per beat-index transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatEvent {
    pub index: usize,
    /// Track progress in [0, 1].
    pub progress: f64,
    /// Seconds until the track ends.
    pub time_remaining: f64,
    pub is_downbeat: bool,
    pub measure_position: u32,
}

/// Payload for `downbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownbeatEvent {
    pub measure: usize,
    pub progress: f64,
}

/// Payload for `sectionChange`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionChangeEvent {
    pub index: usize,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    /// Track progress in [0, 1].
    pub progress: f64,
    /// Progress within the current section in [0, 1].
    pub section_progress: f64,
}

/// Payload for the type-specific `section:<type>` events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMarkerEvent {
    pub index: usize,
    #[serde(rename = "type")]
    pub section_type: SectionType,
}

/// Payload for `gesture`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GestureEvent {
    pub device_id: String,
    pub pattern: String,
    pub action: String,
}

/// Payload for `notification`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
    pub priority: String,
}

/// Payload for `sceneActivated`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneActivatedEvent {
    pub scene: Scene,
    pub results: Vec<ActionResult>,
}

/// An event on the hub bus.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    TrackingStarted(TrackingStartedEvent),
    TrackingStopped,
    Paused(PlaybackMarkerEvent),
    Resumed(PlaybackMarkerEvent),
    Seeked(SeekedEvent),
    Beat(BeatEvent),
    Downbeat(DownbeatEvent),
    SectionChange(SectionChangeEvent),
    /// Type-specific companion of [`HubEvent::SectionChange`], published as
    /// `section:<type>`.
    SectionMarker(SectionMarkerEvent),
    Gesture(GestureEvent),
    RuleExecuted { rule: Rule },
    SceneActivated(SceneActivatedEvent),
    Notification(NotificationEvent),
    MoodChanged { mood: Mood },
    NowPlayingChanged { track: Option<Track> },
}

impl HubEvent {
    /// The event name on the wire.
    pub fn kind(&self) -> String {
        match self {
            HubEvent::TrackingStarted(_) => "trackingStarted".to_string(),
            HubEvent::TrackingStopped => "trackingStopped".to_string(),
            HubEvent::Paused(_) => "paused".to_string(),
            HubEvent::Resumed(_) => "resumed".to_string(),
            HubEvent::Seeked(_) => "seeked".to_string(),
            HubEvent::Beat(_) => "beat".to_string(),
            HubEvent::Downbeat(_) => "downbeat".to_string(),
            HubEvent::SectionChange(_) => "sectionChange".to_string(),
            HubEvent::SectionMarker(e) => format!("section:{}", e.section_type),
            HubEvent::Gesture(_) => "gesture".to_string(),
            HubEvent::RuleExecuted { .. } => "ruleExecuted".to_string(),
            HubEvent::SceneActivated(_) => "sceneActivated".to_string(),
            HubEvent::Notification(_) => "notification".to_string(),
            HubEvent::MoodChanged { .. } => "moodChanged".to_string(),
            HubEvent::NowPlayingChanged { .. } => "nowPlayingChanged".to_string(),
        }
    }

    /// Serialize to the wire shape: the payload's fields plus a `type` tag.
    ///
    /// The tag carries the section type for `section:<type>` events, which
    /// is why this is not a plain serde-tagged enum.
    pub fn to_wire(&self) -> serde_json::Value {
        let payload = match self {
            HubEvent::TrackingStarted(e) => serde_json::to_value(e),
            HubEvent::TrackingStopped => Ok(serde_json::json!({})),
            HubEvent::Paused(e) | HubEvent::Resumed(e) => serde_json::to_value(e),
            HubEvent::Seeked(e) => serde_json::to_value(e),
            HubEvent::Beat(e) => serde_json::to_value(e),
            HubEvent::Downbeat(e) => serde_json::to_value(e),
            HubEvent::SectionChange(e) => serde_json::to_value(e),
            HubEvent::SectionMarker(e) => serde_json::to_value(e),
            HubEvent::Gesture(e) => serde_json::to_value(e),
            HubEvent::RuleExecuted { rule } => serde_json::to_value(rule)
                .map(|r| serde_json::json!({ "rule": r })),
            HubEvent::SceneActivated(e) => serde_json::to_value(e),
            HubEvent::Notification(e) => serde_json::to_value(e),
            HubEvent::MoodChanged { mood } => Ok(serde_json::json!({ "mood": mood })),
            HubEvent::NowPlayingChanged { track } => Ok(serde_json::json!({ "track": track })),
        };

        let mut value = payload.unwrap_or_else(|_| serde_json::json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), serde_json::json!(self.kind()));
        }
        value
    }
}

/// Fan-out bus for [`HubEvent`]s.
///
/// Cloning shares the underlying channel. Publishing never blocks; slow
/// subscribers observe `Lagged` on their receiver and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// An event with no subscribers is dropped silently; the bus exists
    /// from process start, but subscribers come and go.
    pub fn publish(&self, event: HubEvent) {
        if self.sender.send(event).is_err() {
            // No receivers right now. Not an error.
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

/// Drain a receiver of all immediately-available events. Test helper.
#[cfg(test)]
pub fn drain_ready(rx: &mut broadcast::Receiver<HubEvent>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("Event subscriber lagged by {} events", n);
            }
            Err(_) => break,
        }
    }
    events
}
