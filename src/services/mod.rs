//! Outward-facing collaborator seams.
//!
//! The engine and tracker talk to music playback and smart devices only
//! through these traits. The bundled noop implementations keep the hub
//! runnable with no integrations configured.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::analysis::{Track, TrackAnalysis};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("music service unavailable: {0}")]
    MusicUnavailable(String),
    #[error("unknown device: {0}")]
    DeviceNotFound(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
}

#[async_trait]
pub trait MusicService: Send + Sync {
    async fn now_playing(&self) -> Result<Option<Track>, ServiceError>;

    async fn track_analysis(&self, track_id: &str)
        -> Result<Option<TrackAnalysis>, ServiceError>;

    async fn playback_command(&self, command: &str, params: &Value) -> Result<(), ServiceError>;

    /// Current value of a playback attribute ("volume", "shuffle", ...).
    async fn playback_attribute(&self, attribute: &str) -> Result<Value, ServiceError>;
}

#[async_trait]
pub trait DeviceService: Send + Sync {
    async fn send_command(
        &self,
        device_kind: &str,
        device_id: &str,
        command: &str,
        value: Option<&Value>,
    ) -> Result<(), ServiceError>;

    async fn attribute(&self, device_id: &str, attribute: &str) -> Result<Value, ServiceError>;

    async fn anyone_home(&self) -> Result<bool, ServiceError>;
}

/// Music seam with nothing behind it.
pub struct NoopMusicService;

#[async_trait]
impl MusicService for NoopMusicService {
    async fn now_playing(&self) -> Result<Option<Track>, ServiceError> {
        Ok(None)
    }

    async fn track_analysis(
        &self,
        _track_id: &str,
    ) -> Result<Option<TrackAnalysis>, ServiceError> {
        Ok(None)
    }

    async fn playback_command(&self, command: &str, _params: &Value) -> Result<(), ServiceError> {
        debug!("Ignoring playback command '{}', no music service configured", command);
        Ok(())
    }

    async fn playback_attribute(&self, _attribute: &str) -> Result<Value, ServiceError> {
        Ok(Value::Null)
    }
}

/// Device seam with nothing behind it. Presence reads as nobody home.
pub struct NoopDeviceService;

#[async_trait]
impl DeviceService for NoopDeviceService {
    async fn send_command(
        &self,
        device_kind: &str,
        device_id: &str,
        command: &str,
        _value: Option<&Value>,
    ) -> Result<(), ServiceError> {
        debug!(
            "Ignoring {} command '{}' for '{}', no device service configured",
            device_kind, command, device_id
        );
        Ok(())
    }

    async fn attribute(&self, device_id: &str, _attribute: &str) -> Result<Value, ServiceError> {
        Err(ServiceError::DeviceNotFound(device_id.to_string()))
    }

    async fn anyone_home(&self) -> Result<bool, ServiceError> {
        Ok(false)
    }
}
