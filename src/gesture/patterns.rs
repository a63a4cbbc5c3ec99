//! Gesture pattern definitions and the built-in pattern library.

use serde::{Deserialize, Serialize};

/// A raw button event type from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonEventType {
    Press,
    Release,
    Hold,
}

impl ButtonEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonEventType::Press => "press",
            ButtonEventType::Release => "release",
            ButtonEventType::Hold => "hold",
        }
    }
}

impl std::fmt::Display for ButtonEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped button event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    #[serde(rename = "type")]
    pub event_type: ButtonEventType,
    /// Milliseconds, device or hub clock. Only gaps between events matter.
    pub timestamp: u64,
}

/// A registered gesture pattern.
///
/// `sequence` is matched against the tail of a device's event buffer; the
/// optional constraints are all evaluated against that matched window (see
/// the recognizer for exact semantics). `timing` is an expected inter-event
/// gap vector of length `sequence.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GesturePattern {
    pub name: String,
    pub sequence: Vec<ButtonEventType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_hold_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u64>,
    pub action: String,
}

impl GesturePattern {
    pub fn new(name: &str, sequence: Vec<ButtonEventType>, action: &str) -> Self {
        Self {
            name: name.to_string(),
            sequence,
            max_interval: None,
            min_duration: None,
            min_hold_duration: None,
            timing: None,
            tolerance: None,
            action: action.to_string(),
        }
    }

    pub fn with_max_interval(mut self, ms: u64) -> Self {
        self.max_interval = Some(ms);
        self
    }

    pub fn with_min_duration(mut self, ms: u64) -> Self {
        self.min_duration = Some(ms);
        self
    }

    pub fn with_min_hold_duration(mut self, ms: u64) -> Self {
        self.min_hold_duration = Some(ms);
        self
    }

    pub fn with_timing(mut self, gaps: Vec<u64>, tolerance: u64) -> Self {
        self.timing = Some(gaps);
        self.tolerance = Some(tolerance);
        self
    }
}

/// The built-in pattern library.
///
/// Registration order is matching precedence, so double-tap deliberately
/// precedes triple-tap: a prefix pattern shadows longer ones, matching the
/// hub's long-standing behavior.
pub fn default_patterns() -> Vec<GesturePattern> {
    use ButtonEventType::{Hold, Press, Release};

    vec![
        // Music control.
        GesturePattern::new("double-tap", vec![Press, Release, Press, Release], "music-next")
            .with_max_interval(500),
        GesturePattern::new(
            "triple-tap",
            vec![Press, Release, Press, Release, Press, Release],
            "music-previous",
        )
        .with_max_interval(700),
        GesturePattern::new("long-press", vec![Press, Release], "music-pause-play")
            .with_min_duration(1000),
        GesturePattern::new("press-hold-release", vec![Press, Hold, Release], "scene-toggle")
            .with_min_hold_duration(2000),
        // Volume control.
        GesturePattern::new(
            "quick-double-long",
            vec![Press, Release, Press, Release, Press],
            "volume-up",
        )
        .with_max_interval(400)
        .with_min_duration(1000),
        GesturePattern::new(
            "long-quick-quick",
            vec![Press, Release, Press, Release],
            "volume-down",
        )
        .with_timing(vec![1000, 200, 200], 150),
        // Morse-code scene shortcuts: dash = 700 ms, dot = 200 ms.
        GesturePattern::new("morse-m", vec![Press, Release, Press, Release], "scene-morning")
            .with_timing(vec![700, 200, 700], 200),
        GesturePattern::new(
            "morse-p",
            vec![Press, Release, Press, Release, Press, Release],
            "scene-party",
        )
        .with_timing(vec![200, 200, 700, 200, 700], 200),
        GesturePattern::new(
            "morse-s",
            vec![Press, Release, Press, Release, Press, Release],
            "scene-sleep",
        )
        .with_timing(vec![200, 200, 200, 200, 200], 150),
    ]
}
