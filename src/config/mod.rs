mod file_config;

pub use file_config::{EngineConfig, EventsConfig, FileConfig, GestureConfig, TrackerConfig};

use anyhow::Result;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub logging_level: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            logging_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub logging_level: String,

    // Feature configs (with defaults)
    pub events: EventsSettings,
    pub tracker: TrackerSettings,
    pub gesture: GestureSettings,
    pub engine: EngineSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .unwrap_or_else(|| cli.logging_level.clone());

        let events_file = file.events.unwrap_or_default();
        let events_defaults = EventsSettings::default();
        let events = EventsSettings {
            bus_capacity: events_file
                .bus_capacity
                .unwrap_or(events_defaults.bus_capacity),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker_defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            poll_interval_ms: tracker_file
                .poll_interval_ms
                .unwrap_or(tracker_defaults.poll_interval_ms),
        };

        let gesture_file = file.gesture.unwrap_or_default();
        let gesture_defaults = GestureSettings::default();
        let gesture = GestureSettings {
            inactivity_timeout_ms: gesture_file
                .inactivity_timeout_ms
                .unwrap_or(gesture_defaults.inactivity_timeout_ms),
            default_tolerance_ms: gesture_file
                .default_tolerance_ms
                .unwrap_or(gesture_defaults.default_tolerance_ms),
            train_tolerance_ms: gesture_file
                .train_tolerance_ms
                .unwrap_or(gesture_defaults.train_tolerance_ms),
        };

        let engine_file = file.engine.unwrap_or_default();
        let engine_defaults = EngineSettings::default();
        let engine = EngineSettings {
            synthetic_beat_fallback: engine_file
                .synthetic_beat_fallback
                .unwrap_or(engine_defaults.synthetic_beat_fallback),
        };

        Ok(Self {
            port,
            logging_level,
            events,
            tracker,
            gesture,
            engine,
        })
    }
}

/// Settings for the event bus.
#[derive(Debug, Clone)]
pub struct EventsSettings {
    pub bus_capacity: usize,
}

impl Default for EventsSettings {
    fn default() -> Self {
        Self { bus_capacity: 1024 }
    }
}

/// Settings for the beat tracker polling loops.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval_ms: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

/// Settings for gesture recognition timing.
#[derive(Debug, Clone)]
pub struct GestureSettings {
    /// Idle time after which a device's event buffer is cleared.
    pub inactivity_timeout_ms: u64,
    /// Tolerance applied to timing-constrained patterns that carry none.
    pub default_tolerance_ms: u64,
    /// Tolerance assigned to patterns learned from a recorded sample.
    pub train_tolerance_ms: u64,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 2000,
            default_tolerance_ms: 100,
            train_tolerance_ms: 200,
        }
    }
}

/// Settings for the automation engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Drive beat-triggered rules from the track tempo when no live
    /// tracking session is active.
    pub synthetic_beat_fallback: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            synthetic_beat_fallback: false,
        }
    }
}
