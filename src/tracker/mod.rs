//! Real-time beat and section tracking.
//!
//! The tracker replays a precomputed [`TrackAnalysis`] against a monotonic
//! clock: one session at a time, two independent fixed-rate polling loops
//! (beats and sections), edge-triggered events on every index transition.
//! It performs no audio analysis of its own; accuracy is bounded by the
//! polling period, not by the beat grid.
//!
//! States: `Idle → Tracking ⇄ Paused → Idle`. Starting a new session
//! implicitly discards the previous one; there is no queueing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::analysis::{
    containing_beat_index, containing_section_index, index_at, BeatInfo, ProcessedAnalysis,
    SectionInfo, Track, TrackAnalysis,
};
use crate::config::TrackerSettings;
use crate::events::{
    BeatEvent, DownbeatEvent, EventBus, HubEvent, PlaybackMarkerEvent, SectionChangeEvent,
    SectionMarkerEvent, SeekedEvent, TrackingStartedEvent,
};

/// Operations rejected because of the tracker's current state.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("no active tracking session")]
    NoSession,
    #[error("operation invalid: {0}")]
    InvalidState(&'static str),
    #[error("invalid seek position: {0}")]
    InvalidPosition(f64),
}

struct TrackingSession {
    track: Track,
    analysis: TrackAnalysis,
    processed: ProcessedAnalysis,
    /// Wall-clock anchor: playback position == now - started_at.
    started_at: Instant,
    is_playing: bool,
    current_beat_index: usize,
    current_section_index: usize,
    /// Edge-trigger memory, separate from the current indices so that beat 0
    /// emits exactly once at playback start.
    last_emitted_beat: Option<usize>,
    last_emitted_section: Option<usize>,
    cancel: CancellationToken,
}

impl TrackingSession {
    fn elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started_at).as_secs_f64()
    }

    fn meter(&self) -> u32 {
        if self.analysis.time_signature == 0 {
            4
        } else {
            self.analysis.time_signature
        }
    }
}

/// Synchronous snapshot of the tracker, computable without side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_beat: Option<BeatPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_section: Option<SectionPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_beats: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sections: Option<usize>,
}

impl TrackerSnapshot {
    fn idle() -> Self {
        Self {
            is_playing: false,
            track: None,
            current_time: None,
            progress: None,
            current_beat: None,
            current_section: None,
            total_beats: None,
            total_sections: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatPosition {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BeatInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPosition {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SectionInfo>,
}

/// A beat ahead of the playhead, for predictive automation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingBeat {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub time_until: f64,
    pub is_downbeat: bool,
}

/// A section change ahead of the playhead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingSection {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub time_until: f64,
    #[serde(rename = "type")]
    pub section_type: crate::analysis::SectionType,
}

/// Replays one track's analysis as live timeline events.
pub struct BeatTracker {
    state: Arc<Mutex<Option<TrackingSession>>>,
    bus: EventBus,
    poll_interval: Duration,
}

impl BeatTracker {
    pub fn new(bus: EventBus, settings: &TrackerSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            bus,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }

    /// Start tracking a track, discarding any existing session.
    pub fn start_tracking(&self, track: Track, analysis: TrackAnalysis) {
        self.stop_tracking();

        let processed = ProcessedAnalysis::derive(&analysis);
        let total_beats = processed.total_beats();
        let total_sections = processed.total_sections();
        let cancel = CancellationToken::new();

        info!(
            "Starting beat tracking for '{}' by {} ({} beats, {} sections)",
            track.title, track.artist, total_beats, total_sections
        );

        let started_event = TrackingStartedEvent {
            track: track.clone(),
            total_beats,
            total_sections,
        };

        {
            let mut state = self.state.lock().unwrap();
            *state = Some(TrackingSession {
                track,
                analysis,
                processed,
                started_at: Instant::now(),
                is_playing: true,
                current_beat_index: 0,
                current_section_index: 0,
                last_emitted_beat: None,
                last_emitted_section: None,
                cancel: cancel.clone(),
            });
        }

        self.spawn_beat_loop(cancel.clone());
        self.spawn_section_loop(cancel);

        self.bus.publish(HubEvent::TrackingStarted(started_event));
    }

    /// Halt index advancement. Polling loops keep running so that
    /// [`BeatTracker::resume`] continues with the same scheduling state.
    pub fn pause(&self) -> Result<(), TrackerError> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let session = state.as_mut().ok_or(TrackerError::NoSession)?;
            if !session.is_playing {
                return Err(TrackerError::InvalidState("already paused"));
            }
            session.is_playing = false;
            PlaybackMarkerEvent {
                current_beat: session.current_beat_index,
                current_section: session.current_section_index,
            }
        };
        self.bus.publish(HubEvent::Paused(event));
        Ok(())
    }

    pub fn resume(&self) -> Result<(), TrackerError> {
        let event = {
            let mut state = self.state.lock().unwrap();
            let session = state.as_mut().ok_or(TrackerError::NoSession)?;
            if session.is_playing {
                return Err(TrackerError::InvalidState("not paused"));
            }
            session.is_playing = true;
            PlaybackMarkerEvent {
                current_beat: session.current_beat_index,
                current_section: session.current_section_index,
            }
        };
        self.bus.publish(HubEvent::Resumed(event));
        Ok(())
    }

    /// Move the playhead to `position` seconds from the track start.
    ///
    /// Valid while tracking or paused. The beat/section indices are
    /// re-derived from the `[start, start + duration)` interval containing
    /// the position, falling back to 0.
    pub fn seek(&self, position: f64) -> Result<(), TrackerError> {
        if !position.is_finite() || position < 0.0 {
            return Err(TrackerError::InvalidPosition(position));
        }
        let event = {
            let mut state = self.state.lock().unwrap();
            let session = state.as_mut().ok_or(TrackerError::NoSession)?;

            session.started_at = Instant::now() - Duration::from_secs_f64(position);

            let beat_index = containing_beat_index(&session.analysis.beats, position).unwrap_or(0);
            let section_index =
                containing_section_index(&session.analysis.sections, position).unwrap_or(0);
            session.current_beat_index = beat_index;
            session.current_section_index = section_index;
            // Suppress re-emission of the interval we landed in.
            session.last_emitted_beat = Some(beat_index);
            session.last_emitted_section = Some(section_index);

            SeekedEvent {
                position,
                current_beat: beat_index,
                current_section: section_index,
            }
        };
        self.bus.publish(HubEvent::Seeked(event));
        Ok(())
    }

    /// Clear the session and cancel both polling loops. Safe from any state.
    ///
    /// Cancellation is synchronous: a tick already scheduled when this
    /// returns observes a dead token or an empty session and does nothing.
    pub fn stop_tracking(&self) {
        let stopped = {
            let mut state = self.state.lock().unwrap();
            match state.take() {
                Some(session) => {
                    session.cancel.cancel();
                    true
                }
                None => false,
            }
        };
        if stopped {
            debug!("Beat tracking stopped");
            self.bus.publish(HubEvent::TrackingStopped);
        }
    }

    /// Whether a session exists (tracking or paused).
    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Snapshot of the current state; `{isPlaying: false}` when idle.
    pub fn current_state(&self) -> TrackerSnapshot {
        let state = self.state.lock().unwrap();
        let Some(session) = state.as_ref() else {
            return TrackerSnapshot::idle();
        };

        let elapsed = session.elapsed(Instant::now());
        TrackerSnapshot {
            is_playing: session.is_playing,
            track: Some(session.track.clone()),
            current_time: Some(elapsed),
            progress: Some(elapsed / session.analysis.duration),
            current_beat: Some(BeatPosition {
                index: session.current_beat_index,
                data: session
                    .processed
                    .beat_map
                    .get(session.current_beat_index)
                    .copied(),
            }),
            current_section: Some(SectionPosition {
                index: session.current_section_index,
                data: session
                    .processed
                    .section_map
                    .get(session.current_section_index)
                    .copied(),
            }),
            total_beats: Some(session.processed.total_beats()),
            total_sections: Some(session.processed.total_sections()),
        }
    }

    /// Beats whose start lies in `(elapsed, elapsed + lookahead]`.
    pub fn upcoming_beats(&self, lookahead: f64) -> Vec<UpcomingBeat> {
        let state = self.state.lock().unwrap();
        let Some(session) = state.as_ref() else {
            return Vec::new();
        };
        let elapsed = session.elapsed(Instant::now());
        session
            .analysis
            .beats
            .iter()
            .enumerate()
            .filter(|(_, b)| b.start > elapsed && b.start <= elapsed + lookahead)
            .map(|(i, b)| UpcomingBeat {
                index: i,
                start: b.start,
                duration: b.duration,
                time_until: b.start - elapsed,
                is_downbeat: session
                    .processed
                    .beat_map
                    .get(i)
                    .map(|info| info.is_downbeat)
                    .unwrap_or(false),
            })
            .collect()
    }

    /// Section changes whose start lies in `(elapsed, elapsed + lookahead]`.
    pub fn upcoming_section_changes(&self, lookahead: f64) -> Vec<UpcomingSection> {
        let state = self.state.lock().unwrap();
        let Some(session) = state.as_ref() else {
            return Vec::new();
        };
        let elapsed = session.elapsed(Instant::now());
        session
            .analysis
            .sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start > elapsed && s.start <= elapsed + lookahead)
            .filter_map(|(i, s)| {
                session.processed.section_map.get(i).map(|info| UpcomingSection {
                    index: i,
                    start: s.start,
                    duration: s.duration,
                    time_until: s.start - elapsed,
                    section_type: info.section_type,
                })
            })
            .collect()
    }

    fn spawn_beat_loop(&self, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        let bus = self.bus.clone();
        let poll = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => beat_tick(&state, &bus, &token),
                }
            }
        });
    }

    fn spawn_section_loop(&self, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        let bus = self.bus.clone();
        let poll = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => section_tick(&state, &bus, &token),
                }
            }
        });
    }
}

fn beat_tick(
    state: &Mutex<Option<TrackingSession>>,
    bus: &EventBus,
    token: &CancellationToken,
) {
    let events = {
        let mut state = state.lock().unwrap();
        let Some(session) = state.as_mut() else {
            return;
        };
        // A stale tick racing stop_tracking/start_tracking must not touch
        // the replacement session.
        if token.is_cancelled() || !session.is_playing {
            return;
        }

        let elapsed = session.elapsed(Instant::now());
        let Some(index) = index_at(session.analysis.beats.iter().map(|b| b.start), elapsed) else {
            return;
        };
        if session.last_emitted_beat == Some(index) {
            return;
        }
        session.current_beat_index = index;
        session.last_emitted_beat = Some(index);

        let info = session.processed.beat_map[index];
        let progress = elapsed / session.analysis.duration;
        let beat = HubEvent::Beat(BeatEvent {
            index,
            progress,
            time_remaining: session.analysis.duration - elapsed,
            is_downbeat: info.is_downbeat,
            measure_position: info.measure_position,
        });
        let downbeat = info.is_downbeat.then(|| {
            HubEvent::Downbeat(DownbeatEvent {
                measure: index / session.meter() as usize,
                progress,
            })
        });
        (beat, downbeat)
    };

    bus.publish(events.0);
    if let Some(downbeat) = events.1 {
        bus.publish(downbeat);
    }
}

fn section_tick(
    state: &Mutex<Option<TrackingSession>>,
    bus: &EventBus,
    token: &CancellationToken,
) {
    let events = {
        let mut state = state.lock().unwrap();
        let Some(session) = state.as_mut() else {
            return;
        };
        if token.is_cancelled() || !session.is_playing {
            return;
        }

        let elapsed = session.elapsed(Instant::now());
        let Some(index) = index_at(session.analysis.sections.iter().map(|s| s.start), elapsed)
        else {
            return;
        };
        if session.last_emitted_section == Some(index) {
            return;
        }
        session.current_section_index = index;
        session.last_emitted_section = Some(index);

        let section = session.analysis.sections[index];
        let info = session.processed.section_map[index];
        let change = HubEvent::SectionChange(SectionChangeEvent {
            index,
            section_type: info.section_type,
            progress: elapsed / session.analysis.duration,
            section_progress: (elapsed - section.start) / section.duration,
        });
        let marker = HubEvent::SectionMarker(SectionMarkerEvent {
            index,
            section_type: info.section_type,
        });
        (change, marker)
    };

    bus.publish(events.0);
    bus.publish(events.1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_fixtures::{beat_grid, section, simple_analysis, track};
    use crate::analysis::SectionType;
    use crate::events::drain_ready;

    fn tracker_with_bus() -> (BeatTracker, crate::events::EventBus) {
        let bus = EventBus::new(4096);
        let tracker = BeatTracker::new(bus.clone(), &TrackerSettings::default());
        (tracker, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn start_tracking_resets_indices() {
        let (tracker, _bus) = tracker_with_bus();
        tracker.start_tracking(track(4.0), simple_analysis());

        let state = tracker.current_state();
        assert!(state.is_playing);
        assert_eq!(state.current_beat.unwrap().index, 0);
        assert_eq!(state.current_section.unwrap().index, 0);
        assert_eq!(state.total_beats, Some(8));
        assert_eq!(state.total_sections, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_state_reports_not_playing() {
        let (tracker, _bus) = tracker_with_bus();
        let state = tracker.current_state();
        assert!(!state.is_playing);
        assert!(state.track.is_none());
        assert!(state.current_beat.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emits_exactly_one_beat_event_per_beat() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());

        // Play the whole 4-second track.
        tokio::time::sleep(Duration::from_millis(4200)).await;
        tracker.stop_tracking();

        let events = drain_ready(&mut rx);
        let beats: Vec<&BeatEvent> = events
            .iter()
            .filter_map(|e| match e {
                HubEvent::Beat(b) => Some(b),
                _ => None,
            })
            .collect();
        let downbeats: Vec<&DownbeatEvent> = events
            .iter()
            .filter_map(|e| match e {
                HubEvent::Downbeat(d) => Some(d),
                _ => None,
            })
            .collect();

        // 8 beats, edge-triggered: exactly one event each.
        assert_eq!(beats.len(), 8);
        let indices: Vec<usize> = beats.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7]);

        // Every 4th beat is a downbeat in 4/4.
        assert_eq!(downbeats.len(), 2);
        assert_eq!(downbeats[0].measure, 0);
        assert_eq!(downbeats[1].measure, 1);
        assert!(beats[0].is_downbeat);
        assert!(beats[4].is_downbeat);
        assert!(!beats[1].is_downbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_section_changes_with_type_markers() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());

        tokio::time::sleep(Duration::from_millis(4200)).await;
        tracker.stop_tracking();

        let events = drain_ready(&mut rx);
        let changes: Vec<&SectionChangeEvent> = events
            .iter()
            .filter_map(|e| match e {
                HubEvent::SectionChange(c) => Some(c),
                _ => None,
            })
            .collect();
        let markers: Vec<&SectionMarkerEvent> = events
            .iter()
            .filter_map(|e| match e {
                HubEvent::SectionMarker(m) => Some(m),
                _ => None,
            })
            .collect();

        assert_eq!(changes.len(), 3);
        assert_eq!(markers.len(), 3);
        assert_eq!(changes[0].section_type, SectionType::Intro);
        assert_eq!(changes[1].section_type, SectionType::Chorus);
        assert_eq!(changes[2].section_type, SectionType::Outro);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_halts_index_advancement() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        tracker.pause().unwrap();
        let paused_at = tracker.current_state().current_beat.unwrap().index;

        // Ticks keep firing but nothing advances while paused.
        let _ = drain_ready(&mut rx);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(drain_ready(&mut rx)
            .iter()
            .all(|e| !matches!(e, HubEvent::Beat(_))));

        tracker.resume().unwrap();
        let resumed_at = tracker.current_state().current_beat.unwrap().index;
        assert_eq!(paused_at, resumed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_repositions_clock_and_indices() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());

        tracker.seek(2.0).unwrap();
        let state = tracker.current_state();
        let current_time = state.current_time.unwrap();
        assert!(
            (current_time - 2.0).abs() < 0.06,
            "current_time {} should be within one polling period of 2.0",
            current_time
        );
        assert_eq!(state.current_beat.unwrap().index, 4);
        assert_eq!(state.current_section.unwrap().index, 1);

        let events = drain_ready(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            HubEvent::Seeked(SeekedEvent {
                current_beat: 4,
                current_section: 1,
                ..
            })
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_outside_any_beat_falls_back_to_zero() {
        let (tracker, _bus) = tracker_with_bus();
        let analysis = TrackAnalysis {
            beats: beat_grid(4, 1.0, 0.5),
            sections: vec![section(1.0, 2.0, -10.0, 0.9)],
            tempo: 120.0,
            duration: 4.0,
            time_signature: 4,
        };
        tracker.start_tracking(track(4.0), analysis);

        // 0.2s is before the first beat and the first section.
        tracker.seek(0.2).unwrap();
        let state = tracker.current_state();
        assert_eq!(state.current_beat.unwrap().index, 0);
        assert_eq!(state.current_section.unwrap().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_silences_the_loops() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());

        tokio::time::sleep(Duration::from_millis(600)).await;
        tracker.stop_tracking();
        let _ = drain_ready(&mut rx);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let after = drain_ready(&mut rx);
        assert!(after.is_empty(), "no events after stop: {:?}", after);
        assert!(!tracker.current_state().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_previous_session() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        tracker.start_tracking(track(4.0), simple_analysis());
        tokio::time::sleep(Duration::from_millis(1100)).await;

        tracker.start_tracking(track(4.0), simple_analysis());
        let state = tracker.current_state();
        assert_eq!(state.current_beat.unwrap().index, 0);

        let events = drain_ready(&mut rx);
        assert!(events.contains(&HubEvent::TrackingStopped));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, HubEvent::TrackingStarted(_)))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_state_operations_are_rejected() {
        let (tracker, _bus) = tracker_with_bus();
        assert_eq!(tracker.resume(), Err(TrackerError::NoSession));
        assert_eq!(tracker.pause(), Err(TrackerError::NoSession));
        assert_eq!(tracker.seek(1.0), Err(TrackerError::NoSession));

        tracker.start_tracking(track(4.0), simple_analysis());
        assert_eq!(
            tracker.resume(),
            Err(TrackerError::InvalidState("not paused"))
        );
        tracker.pause().unwrap();
        assert_eq!(
            tracker.pause(),
            Err(TrackerError::InvalidState("already paused"))
        );
        assert_eq!(tracker.seek(-1.0), Err(TrackerError::InvalidPosition(-1.0)));
        // Seek is valid while paused.
        tracker.seek(1.0).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn upcoming_beats_within_lookahead_window() {
        let (tracker, _bus) = tracker_with_bus();
        tracker.start_tracking(track(4.0), simple_analysis());

        let upcoming = tracker.upcoming_beats(1.1);
        let indices: Vec<usize> = upcoming.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert!((upcoming[0].time_until - 0.5).abs() < 0.05);
        assert!(!upcoming[0].is_downbeat);

        let sections = tracker.upcoming_section_changes(2.0);
        let section_indices: Vec<usize> = sections.iter().map(|s| s.index).collect();
        assert_eq!(section_indices, vec![1]);
        assert_eq!(sections[0].section_type, SectionType::Chorus);
    }

    #[tokio::test(start_paused = true)]
    async fn downbeats_follow_the_analysis_meter() {
        let (tracker, bus) = tracker_with_bus();
        let mut rx = bus.subscribe();
        let mut analysis = simple_analysis();
        analysis.time_signature = 3;
        tracker.start_tracking(track(4.0), analysis);

        tokio::time::sleep(Duration::from_millis(4200)).await;
        tracker.stop_tracking();

        let downbeat_measures: Vec<usize> = drain_ready(&mut rx)
            .iter()
            .filter_map(|e| match e {
                HubEvent::Downbeat(d) => Some(d.measure),
                _ => None,
            })
            .collect();
        // Beats 0, 3 and 6 are downbeats in 3/4.
        assert_eq!(downbeat_measures, vec![0, 1, 2]);
    }
}
