//! Gesture recognition over raw device button events.
//!
//! Each device gets an event buffer. On every incoming event the buffer's
//! tail is matched against the registered patterns in registration order;
//! the first match wins, emits a `gesture` event on the bus and clears the
//! buffer. A buffer with no match is cleared by an inactivity timeout so
//! stale partial sequences cannot match much later.

mod patterns;

pub use patterns::{default_patterns, ButtonEventType, GesturePattern, TimedEvent};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GestureSettings;
use crate::events::{EventBus, GestureEvent, HubEvent};

/// Errors surfaced at the gesture boundary.
#[derive(Debug, Error, PartialEq)]
pub enum GestureError {
    #[error("unknown button event type: {0}")]
    UnknownEventType(String),
    #[error("malformed button event: missing {0}")]
    MissingField(&'static str),
    #[error("training requires at least two events")]
    EmptyTrainingSample,
}

struct DeviceBuffer {
    events: Vec<TimedEvent>,
    pending_timeout: Option<CancellationToken>,
}

impl DeviceBuffer {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            pending_timeout: None,
        }
    }

    fn cancel_timeout(&mut self) {
        if let Some(token) = self.pending_timeout.take() {
            token.cancel();
        }
    }
}

struct RecognizerState {
    /// Registration order is matching precedence.
    patterns: Vec<GesturePattern>,
    buffers: HashMap<String, DeviceBuffer>,
}

/// Classifies raw button event streams into gestures.
pub struct GestureRecognizer {
    state: Arc<Mutex<RecognizerState>>,
    bus: EventBus,
    inactivity_timeout: Duration,
    default_tolerance_ms: u64,
    train_tolerance_ms: u64,
}

impl GestureRecognizer {
    /// Create a recognizer preloaded with the built-in pattern library.
    pub fn new(bus: EventBus, settings: &GestureSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(RecognizerState {
                patterns: default_patterns(),
                buffers: HashMap::new(),
            })),
            bus,
            inactivity_timeout: Duration::from_millis(settings.inactivity_timeout_ms),
            default_tolerance_ms: settings.default_tolerance_ms,
            train_tolerance_ms: settings.train_tolerance_ms,
        }
    }

    /// Register a pattern. Re-registering a name overwrites it in place,
    /// preserving its position in the precedence order.
    pub fn register_pattern(&self, pattern: GesturePattern) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.patterns.iter_mut().find(|p| p.name == pattern.name) {
            *existing = pattern;
        } else {
            state.patterns.push(pattern);
        }
    }

    pub fn patterns(&self) -> Vec<GesturePattern> {
        self.state.lock().unwrap().patterns.clone()
    }

    /// Parse and process an event arriving as loose JSON from a device
    /// bridge. Malformed events are rejected here, never silently matched.
    pub fn process_raw_event(
        &self,
        device_id: &str,
        raw: &serde_json::Value,
    ) -> Result<Option<GestureEvent>, GestureError> {
        let event = parse_timed_event(raw)?;
        Ok(self.process_device_event(device_id, event))
    }

    /// Feed one button event for a device.
    ///
    /// Returns the recognized gesture, if any; the same gesture is also
    /// published on the bus.
    pub fn process_device_event(&self, device_id: &str, event: TimedEvent) -> Option<GestureEvent> {
        let matched = {
            let mut state = self.state.lock().unwrap();
            let buffer = state
                .buffers
                .entry(device_id.to_string())
                .or_insert_with(DeviceBuffer::new);
            buffer.cancel_timeout();
            buffer.events.push(event);

            // Borrow juggling: matching needs both the pattern list and the
            // buffer, so take a snapshot of the events.
            let events = buffer.events.clone();
            let matched = state
                .patterns
                .iter()
                .find(|p| matches_pattern(p, &events, self.default_tolerance_ms))
                .cloned();

            let buffer = state.buffers.get_mut(device_id).unwrap();
            match &matched {
                Some(_) => buffer.events.clear(),
                None => {
                    let token = CancellationToken::new();
                    buffer.pending_timeout = Some(token.clone());
                    self.spawn_inactivity_timeout(device_id.to_string(), token);
                }
            }
            matched
        };

        matched.map(|pattern| {
            debug!(
                "Device {} matched gesture pattern '{}'",
                device_id, pattern.name
            );
            let gesture = GestureEvent {
                device_id: device_id.to_string(),
                pattern: pattern.name,
                action: pattern.action,
            };
            self.bus.publish(HubEvent::Gesture(gesture.clone()));
            gesture
        })
    }

    /// Derive and register a custom pattern from a recorded example.
    ///
    /// The pattern is keyed `custom-<device>-<name>` with action
    /// `custom-<name>`; re-training overwrites the previous recording.
    pub fn train_pattern(
        &self,
        device_id: &str,
        name: &str,
        events: &[TimedEvent],
    ) -> Result<GesturePattern, GestureError> {
        if events.len() < 2 {
            return Err(GestureError::EmptyTrainingSample);
        }

        let sequence = events.iter().map(|e| e.event_type).collect();
        let timing = events
            .windows(2)
            .map(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp))
            .collect();

        let pattern = GesturePattern::new(
            &format!("custom-{}-{}", device_id, name),
            sequence,
            &format!("custom-{}", name),
        )
        .with_timing(timing, self.train_tolerance_ms);

        info!(
            "Trained gesture pattern '{}' for device {}",
            pattern.name, device_id
        );
        self.register_pattern(pattern.clone());
        Ok(pattern)
    }

    /// Drop a device's buffer and cancel its pending timeout.
    pub fn clear_device(&self, device_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut buffer) = state.buffers.remove(device_id) {
            buffer.cancel_timeout();
        }
    }

    #[cfg(test)]
    fn buffered_events(&self, device_id: &str) -> Vec<TimedEvent> {
        self.state
            .lock()
            .unwrap()
            .buffers
            .get(device_id)
            .map(|b| b.events.clone())
            .unwrap_or_default()
    }

    fn spawn_inactivity_timeout(&self, device_id: String, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        let timeout = self.inactivity_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let mut state = state.lock().unwrap();
                    if let Some(buffer) = state.buffers.get_mut(&device_id) {
                        if !buffer.events.is_empty() {
                            debug!("Clearing stale gesture buffer for device {}", device_id);
                            buffer.events.clear();
                        }
                        buffer.pending_timeout = None;
                    }
                }
            }
        });
    }
}

fn parse_timed_event(raw: &serde_json::Value) -> Result<TimedEvent, GestureError> {
    let type_str = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(GestureError::MissingField("type"))?;
    let event_type = match type_str {
        "press" => ButtonEventType::Press,
        "release" => ButtonEventType::Release,
        "hold" => ButtonEventType::Hold,
        other => return Err(GestureError::UnknownEventType(other.to_string())),
    };
    let timestamp = raw
        .get("timestamp")
        .and_then(|v| v.as_u64())
        .ok_or(GestureError::MissingField("timestamp"))?;
    Ok(TimedEvent {
        event_type,
        timestamp,
    })
}

/// Match a pattern against the tail of an event buffer.
fn matches_pattern(pattern: &GesturePattern, events: &[TimedEvent], default_tolerance: u64) -> bool {
    let n = pattern.sequence.len();
    if n == 0 || events.len() < n {
        return false;
    }
    let window = &events[events.len() - n..];

    if !window
        .iter()
        .zip(&pattern.sequence)
        .all(|(event, symbol)| event.event_type == *symbol)
    {
        return false;
    }

    if let Some(max_interval) = pattern.max_interval {
        let within = window
            .windows(2)
            .all(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp) <= max_interval);
        if !within {
            return false;
        }
    }

    // Duration constraints are window-scoped: a pattern elsewhere in the
    // buffer cannot lend its elapsed time to this one.
    if let Some(min_duration) = pattern.min_duration {
        let span = window[window.len() - 1]
            .timestamp
            .saturating_sub(window[0].timestamp);
        if span < min_duration {
            return false;
        }
    }

    if let Some(min_hold) = pattern.min_hold_duration {
        let last = window[window.len() - 1];
        if last.event_type != ButtonEventType::Release {
            return false;
        }
        let Some(press) = window
            .iter()
            .rev()
            .find(|e| e.event_type == ButtonEventType::Press)
        else {
            return false;
        };
        if last.timestamp.saturating_sub(press.timestamp) < min_hold {
            return false;
        }
    }

    if let Some(expected) = &pattern.timing {
        if expected.len() != n.saturating_sub(1) {
            return false;
        }
        let tolerance = pattern.tolerance.unwrap_or(default_tolerance);
        for (pair, &expected_gap) in window.windows(2).zip(expected) {
            let actual = pair[1].timestamp.saturating_sub(pair[0].timestamp);
            if actual.abs_diff(expected_gap) > tolerance {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ButtonEventType::{Hold, Press, Release};

    fn recognizer() -> GestureRecognizer {
        GestureRecognizer::new(EventBus::new(64), &GestureSettings::default())
    }

    fn event(event_type: ButtonEventType, timestamp: u64) -> TimedEvent {
        TimedEvent {
            event_type,
            timestamp,
        }
    }

    fn feed(
        recognizer: &GestureRecognizer,
        device: &str,
        events: &[(ButtonEventType, u64)],
    ) -> Option<GestureEvent> {
        let mut last = None;
        for &(event_type, timestamp) in events {
            last = recognizer.process_device_event(device, event(event_type, timestamp));
        }
        last
    }

    #[tokio::test]
    async fn double_tap_within_interval_matches_and_clears() {
        let recognizer = recognizer();
        let gesture = feed(
            &recognizer,
            "button-1",
            &[(Press, 0), (Release, 100), (Press, 300), (Release, 400)],
        )
        .expect("double tap should match");

        assert_eq!(gesture.pattern, "double-tap");
        assert_eq!(gesture.action, "music-next");
        assert!(recognizer.buffered_events("button-1").is_empty());
    }

    #[tokio::test]
    async fn double_tap_with_slow_gap_does_not_match() {
        let recognizer = recognizer();
        let gesture = feed(
            &recognizer,
            "button-1",
            &[(Press, 0), (Release, 100), (Press, 700), (Release, 800)],
        );

        assert!(gesture.is_none());
        assert_eq!(recognizer.buffered_events("button-1").len(), 4);
    }

    #[tokio::test]
    async fn earlier_registered_prefix_shadows_longer_pattern() {
        // Four taps: the double-tap fires after the second tap and clears the
        // buffer, so triple-tap never sees six events. Registration-order
        // precedence, preserved deliberately.
        let recognizer = recognizer();
        let gesture = feed(
            &recognizer,
            "button-1",
            &[(Press, 0), (Release, 50), (Press, 150), (Release, 200)],
        )
        .unwrap();
        assert_eq!(gesture.pattern, "double-tap");
    }

    #[tokio::test]
    async fn long_press_requires_window_span() {
        let recognizer = recognizer();
        assert!(feed(&recognizer, "b", &[(Press, 0), (Release, 400)]).is_none());

        recognizer.clear_device("b");
        let gesture = feed(&recognizer, "b", &[(Press, 0), (Release, 1200)]).unwrap();
        assert_eq!(gesture.pattern, "long-press");
        assert_eq!(gesture.action, "music-pause-play");
    }

    #[tokio::test]
    async fn press_hold_release_requires_hold_duration() {
        let recognizer = recognizer();

        let too_short = feed(
            &recognizer,
            "b",
            &[(Press, 0), (Hold, 500), (Release, 1000)],
        );
        assert!(too_short.is_none());

        recognizer.clear_device("b");
        let long_enough = feed(
            &recognizer,
            "b",
            &[(Press, 0), (Hold, 1500), (Release, 2500)],
        )
        .unwrap();
        assert_eq!(long_enough.pattern, "press-hold-release");
        assert_eq!(long_enough.action, "scene-toggle");
    }

    #[tokio::test]
    async fn trained_pattern_replays_within_tolerance() {
        let recognizer = recognizer();
        let sample = [event(Press, 0), event(Release, 300), event(Press, 900)];
        let pattern = recognizer.train_pattern("button-2", "wave", &sample).unwrap();

        assert_eq!(pattern.name, "custom-button-2-wave");
        assert_eq!(pattern.action, "custom-wave");
        assert_eq!(pattern.timing, Some(vec![300, 600]));

        // Replay with each gap off by 100 ms, inside the 200 ms tolerance.
        let gesture = feed(
            &recognizer,
            "button-2",
            &[(Press, 10_000), (Release, 10_400), (Press, 11_100)],
        )
        .unwrap();
        assert_eq!(gesture.action, "custom-wave");
    }

    #[tokio::test]
    async fn trained_pattern_rejects_shifted_timing() {
        let recognizer = recognizer();
        let sample = [event(Press, 0), event(Release, 300), event(Press, 900)];
        recognizer.train_pattern("button-2", "wave", &sample).unwrap();

        // Each gap shifted by more than the 200 ms tolerance.
        let gesture = feed(
            &recognizer,
            "button-2",
            &[(Press, 10_000), (Release, 10_550), (Press, 11_450)],
        );
        assert!(gesture.is_none());
    }

    #[tokio::test]
    async fn retraining_overwrites_in_place() {
        let recognizer = recognizer();
        let sample = [event(Press, 0), event(Release, 300)];
        recognizer.train_pattern("d", "x", &sample).unwrap();
        let count_before = recognizer.patterns().len();

        let sample2 = [event(Press, 0), event(Release, 500)];
        recognizer.train_pattern("d", "x", &sample2).unwrap();

        let patterns = recognizer.patterns();
        assert_eq!(patterns.len(), count_before);
        let trained = patterns
            .iter()
            .find(|p| p.name == "custom-d-x")
            .unwrap();
        assert_eq!(trained.timing, Some(vec![500]));
    }

    #[tokio::test]
    async fn training_rejects_tiny_samples() {
        let recognizer = recognizer();
        let result = recognizer.train_pattern("d", "x", &[event(Press, 0)]);
        assert_eq!(result.unwrap_err(), GestureError::EmptyTrainingSample);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_timeout_clears_buffer() {
        let recognizer = recognizer();
        recognizer.process_device_event("button-1", event(Press, 0));
        assert_eq!(recognizer.buffered_events("button-1").len(), 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(recognizer.buffered_events("button-1").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_rearms_inactivity_timeout() {
        let recognizer = recognizer();
        // A release-release pair matches no pattern, so the buffer only
        // empties when a timeout fires.
        recognizer.process_device_event("button-1", event(Release, 0));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Second event before the timeout fires; old timer must be cancelled.
        recognizer.process_device_event("button-1", event(Release, 1500));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(recognizer.buffered_events("button-1").len(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(recognizer.buffered_events("button-1").is_empty());
    }

    #[tokio::test]
    async fn malformed_events_are_rejected_at_the_boundary() {
        let recognizer = recognizer();

        let no_type = serde_json::json!({ "timestamp": 100 });
        assert_eq!(
            recognizer.process_raw_event("d", &no_type).unwrap_err(),
            GestureError::MissingField("type")
        );

        let bad_type = serde_json::json!({ "type": "wiggle", "timestamp": 100 });
        assert_eq!(
            recognizer.process_raw_event("d", &bad_type).unwrap_err(),
            GestureError::UnknownEventType("wiggle".to_string())
        );

        let no_timestamp = serde_json::json!({ "type": "press" });
        assert_eq!(
            recognizer.process_raw_event("d", &no_timestamp).unwrap_err(),
            GestureError::MissingField("timestamp")
        );

        assert!(recognizer.buffered_events("d").is_empty());
    }

    #[tokio::test]
    async fn gesture_is_published_on_the_bus() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let recognizer = GestureRecognizer::new(bus, &GestureSettings::default());

        feed(
            &recognizer,
            "button-1",
            &[(Press, 0), (Release, 100), (Press, 300), (Release, 400)],
        );

        match rx.try_recv().unwrap() {
            HubEvent::Gesture(g) => assert_eq!(g.pattern, "double-tap"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
