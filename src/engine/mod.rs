//! Rule and scene automation.
//!
//! Rules pair a trigger with optional conditions and a list of actions.
//! Schedule triggers run on the cron registry; every other trigger kind is
//! driven by subscribing to the hub event bus. Conditions are AND-ed and
//! fail closed: an evaluation error counts as unmet. Actions run
//! sequentially with per-action error isolation.

pub mod models;
mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::Track;
use crate::config::EngineSettings;
use crate::events::{EventBus, HubEvent, NotificationEvent, SceneActivatedEvent};
use crate::services::{DeviceService, MusicService};
use crate::tracker::BeatTracker;

use models::{Action, ActionResult, Condition, NewRule, NewScene, Rule, Scene, Trigger};
use scheduler::{parse_schedule, JobRegistry};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown rule: {0}")]
    RuleNotFound(String),
    #[error("unknown scene: {0}")]
    SceneNotFound(String),
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },
}

/// Cap on scene-within-scene nesting; a self-referencing scene would
/// otherwise recurse without bound.
const MAX_SCENE_DEPTH: usize = 8;

#[derive(Default)]
struct EngineState {
    rules: HashMap<String, Rule>,
    scenes: HashMap<String, Scene>,
}

pub struct AutomationEngine {
    /// Handed to spawned tasks and cron jobs; they give up instead of
    /// keeping a dropped engine alive.
    weak_self: Weak<AutomationEngine>,
    state: Mutex<EngineState>,
    jobs: JobRegistry,
    bus: EventBus,
    tracker: Arc<BeatTracker>,
    music: Arc<dyn MusicService>,
    devices: Arc<dyn DeviceService>,
    settings: EngineSettings,
    /// Token for the synthetic beat timers of the current track, if armed.
    synthetic: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl AutomationEngine {
    pub fn new(
        bus: EventBus,
        tracker: Arc<BeatTracker>,
        music: Arc<dyn MusicService>,
        devices: Arc<dyn DeviceService>,
        settings: &EngineSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            state: Mutex::new(EngineState::default()),
            jobs: JobRegistry::new(),
            bus,
            tracker,
            music,
            devices,
            settings: settings.clone(),
            synthetic: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancel all scheduled jobs, synthetic timers and the event loop.
    pub fn shutdown(&self) {
        info!("Shutting down automation engine");
        self.shutdown.cancel();
        self.jobs.cancel_all();
        if let Some(token) = self.synthetic.lock().unwrap().take() {
            token.cancel();
        }
    }

    // Rule CRUD. At most one scheduled job per rule id; the job is
    // cancelled before any mutation so a rule never fires under a stale
    // definition.

    pub fn create_rule(&self, new: NewRule) -> Result<Rule, EngineError> {
        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            name: new.name,
            trigger: new.trigger,
            conditions: new.conditions,
            actions: new.actions,
            enabled: new.enabled,
            created_at: Utc::now(),
        };
        self.register_schedule(&rule)?;
        info!("Created rule '{}' ({})", rule.name, rule.id);
        self.state
            .lock()
            .unwrap()
            .rules
            .insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    pub fn update_rule(&self, id: &str, new: NewRule) -> Result<Rule, EngineError> {
        let existing = self
            .get_rule(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;
        // Validate the incoming trigger before touching the existing job,
        // so a rejected update leaves the rule and its schedule intact.
        if let Trigger::Schedule { cron } = &new.trigger {
            parse_schedule(cron)?;
        }
        self.jobs.cancel(id);

        let rule = Rule {
            id: existing.id,
            owner_id: new.owner_id.or(existing.owner_id),
            name: new.name,
            trigger: new.trigger,
            conditions: new.conditions,
            actions: new.actions,
            enabled: new.enabled,
            created_at: existing.created_at,
        };
        self.register_schedule(&rule)?;
        self.state
            .lock()
            .unwrap()
            .rules
            .insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    pub fn delete_rule(&self, id: &str) -> Result<Rule, EngineError> {
        self.jobs.cancel(id);
        self.state
            .lock()
            .unwrap()
            .rules
            .remove(id)
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))
    }

    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.state.lock().unwrap().rules.get(id).cloned()
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().rules.values().cloned().collect()
    }

    /// Register a cron job for a schedule-triggered rule. The expression is
    /// validated even when the rule is disabled, so a bad rule is rejected
    /// at creation rather than on enable.
    fn register_schedule(&self, rule: &Rule) -> Result<(), EngineError> {
        let Trigger::Schedule { cron } = &rule.trigger else {
            return Ok(());
        };
        let schedule = parse_schedule(cron)?;
        if !rule.enabled {
            return Ok(());
        }

        let engine = self.weak_self.clone();
        let rule_id = rule.id.clone();
        self.jobs.register(&rule.id, schedule, move || {
            let engine = engine.upgrade();
            let rule_id = rule_id.clone();
            async move {
                if let Some(engine) = engine {
                    engine.execute_rule_by_id(&rule_id).await;
                }
            }
        });
        Ok(())
    }

    // Scene CRUD.

    pub fn create_scene(&self, new: NewScene) -> Scene {
        let scene = Scene {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            name: new.name,
            icon: new.icon,
            actions: new.actions,
        };
        info!("Created scene '{}' ({})", scene.name, scene.id);
        self.state
            .lock()
            .unwrap()
            .scenes
            .insert(scene.id.clone(), scene.clone());
        scene
    }

    pub fn update_scene(&self, id: &str, new: NewScene) -> Result<Scene, EngineError> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .scenes
            .get(id)
            .ok_or_else(|| EngineError::SceneNotFound(id.to_string()))?;
        let scene = Scene {
            id: existing.id.clone(),
            owner_id: new.owner_id.or_else(|| existing.owner_id.clone()),
            name: new.name,
            icon: new.icon,
            actions: new.actions,
        };
        state.scenes.insert(scene.id.clone(), scene.clone());
        Ok(scene)
    }

    pub fn delete_scene(&self, id: &str) -> Result<Scene, EngineError> {
        self.state
            .lock()
            .unwrap()
            .scenes
            .remove(id)
            .ok_or_else(|| EngineError::SceneNotFound(id.to_string()))
    }

    pub fn get_scene(&self, id: &str) -> Option<Scene> {
        self.state.lock().unwrap().scenes.get(id).cloned()
    }

    pub fn list_scenes(&self) -> Vec<Scene> {
        self.state
            .lock()
            .unwrap()
            .scenes
            .values()
            .cloned()
            .collect()
    }

    // Execution.

    pub async fn execute_rule_by_id(&self, id: &str) {
        let Some(rule) = self.get_rule(id) else {
            warn!("Fired job for missing rule {}", id);
            return;
        };
        self.execute_rule(&rule).await;
    }

    /// Run one rule: skip when disabled, AND the conditions fail-closed,
    /// then run actions sequentially. Emits `ruleExecuted` once actions
    /// ran, whatever their individual outcomes.
    pub async fn execute_rule(&self, rule: &Rule) {
        if !rule.enabled {
            return;
        }
        if !self.conditions_met(&rule.conditions).await {
            debug!("Conditions not met for rule '{}'", rule.name);
            return;
        }

        info!("Executing rule '{}'", rule.name);
        self.run_actions(&rule.actions, 0).await;
        self.bus
            .publish(HubEvent::RuleExecuted { rule: rule.clone() });
    }

    /// Activate a scene by id. Unknown ids are a hard error; action
    /// failures are not, they land in the per-action results.
    pub async fn activate_scene(&self, scene_id: &str) -> Result<Vec<ActionResult>, EngineError> {
        self.activate_scene_at(scene_id, 0).await
    }

    async fn activate_scene_at(
        &self,
        scene_id: &str,
        depth: usize,
    ) -> Result<Vec<ActionResult>, EngineError> {
        let scene = self
            .get_scene(scene_id)
            .ok_or_else(|| EngineError::SceneNotFound(scene_id.to_string()))?;

        info!("Activating scene '{}'", scene.name);
        let results = self.run_actions(&scene.actions, depth).await;
        self.bus.publish(HubEvent::SceneActivated(SceneActivatedEvent {
            scene,
            results: results.clone(),
        }));
        Ok(results)
    }

    async fn conditions_met(&self, conditions: &[Condition]) -> bool {
        for condition in conditions {
            if !self.evaluate_condition(condition).await {
                return false;
            }
        }
        true
    }

    async fn evaluate_condition(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Time {
                start_time,
                end_time,
            } => {
                let parsed = NaiveTime::parse_from_str(start_time, "%H:%M")
                    .and_then(|s| NaiveTime::parse_from_str(end_time, "%H:%M").map(|e| (s, e)));
                match parsed {
                    Ok((start, end)) => {
                        let now = chrono::Local::now().time();
                        if end < start {
                            // Window wraps past midnight.
                            now >= start || now <= end
                        } else {
                            now >= start && now <= end
                        }
                    }
                    Err(e) => {
                        warn!("Unparseable time condition {}-{}: {}", start_time, end_time, e);
                        false
                    }
                }
            }
            Condition::Presence => self.devices.anyone_home().await.unwrap_or(false),
            Condition::Music { attribute, value } => self
                .music
                .playback_attribute(attribute)
                .await
                .map(|actual| actual == *value)
                .unwrap_or(false),
            Condition::Device {
                device_id,
                attribute,
                value,
            } => self
                .devices
                .attribute(device_id, attribute)
                .await
                .map(|actual| actual == *value)
                .unwrap_or(false),
        }
    }

    async fn run_actions(&self, actions: &[Action], depth: usize) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            match self.execute_action(action, depth).await {
                Ok(()) => results.push(ActionResult::ok(action.clone())),
                Err(error) => {
                    warn!("Action failed: {}", error);
                    results.push(ActionResult::failed(action.clone(), error));
                }
            }
        }
        results
    }

    // Boxed so the scene recursion cycle bottoms out at a declared,
    // Send future type.
    fn execute_action<'a>(
        &'a self,
        action: &'a Action,
        depth: usize,
    ) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            match action {
                Action::Device {
                    device_kind,
                    device_id,
                    command,
                    value,
                } => self
                    .devices
                    .send_command(device_kind, device_id, command, value.as_ref())
                    .await
                    .map_err(|e| e.to_string()),
                Action::Music { command, params } => self
                    .music
                    .playback_command(command, params)
                    .await
                    .map_err(|e| e.to_string()),
                Action::Scene { scene_id } => {
                    if depth >= MAX_SCENE_DEPTH {
                        return Err(format!(
                            "scene '{}' nested deeper than {} levels",
                            scene_id, MAX_SCENE_DEPTH
                        ));
                    }
                    self.activate_scene_at(scene_id, depth + 1)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
                Action::Notification {
                    title,
                    message,
                    priority,
                } => {
                    self.bus.publish(HubEvent::Notification(NotificationEvent {
                        title: title.clone(),
                        message: message.clone(),
                        priority: priority.clone(),
                    }));
                    Ok(())
                }
            }
        })
    }

    // Event wiring.

    /// Subscribe to the bus and drive event-triggered rules until shutdown.
    pub fn spawn_event_loop(self: Arc<Self>) -> JoinHandle<()> {
        let engine = self;
        let mut rx = engine.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => engine.handle_event(event).await,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Automation event loop lagged by {} events", n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Automation event loop exited");
        })
    }

    async fn handle_event(&self, event: HubEvent) {
        match &event {
            HubEvent::NowPlayingChanged { track } => {
                self.handle_track_change(track.clone()).await;
                return;
            }
            HubEvent::TrackingStarted(_) => {
                // Live beats take over from any synthetic timers.
                self.cancel_synthetic_timers();
                return;
            }
            _ => {}
        }

        let matching: Vec<Rule> = {
            let state = self.state.lock().unwrap();
            state
                .rules
                .values()
                .filter(|rule| rule.enabled && trigger_matches(&rule.trigger, &event))
                .cloned()
                .collect()
        };

        // Each rule runs on its own task so a slow action cannot stall the
        // event loop or sibling rules.
        for rule in matching {
            let Some(engine) = self.weak_self.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                engine.execute_rule(&rule).await;
            });
        }
    }

    fn cancel_synthetic_timers(&self) {
        if let Some(token) = self.synthetic.lock().unwrap().take() {
            debug!("Cancelling synthetic beat timers");
            token.cancel();
        }
    }

    /// Legacy tempo-derived beat path. Only arms when enabled by config and
    /// the tracker has no live session, so real and synthetic beats are
    /// never active for the same track.
    async fn handle_track_change(&self, track: Option<Track>) {
        self.cancel_synthetic_timers();

        if !self.settings.synthetic_beat_fallback {
            return;
        }
        let Some(track) = track else {
            return;
        };
        if self.tracker.is_active() {
            return;
        }

        let analysis = match self.music.track_analysis(&track.id).await {
            Ok(Some(analysis)) => analysis,
            Ok(None) => {
                debug!("No analysis for '{}', skipping synthetic beats", track.title);
                return;
            }
            Err(e) => {
                warn!("Failed to fetch analysis for '{}': {}", track.title, e);
                return;
            }
        };
        if analysis.tempo <= 0.0 {
            return;
        }

        let beat_rules: Vec<Rule> = {
            let state = self.state.lock().unwrap();
            state
                .rules
                .values()
                .filter(|r| r.enabled && matches!(r.trigger, Trigger::Beat))
                .cloned()
                .collect()
        };
        if beat_rules.is_empty() {
            return;
        }

        let beat_interval = Duration::from_millis((60_000.0 / analysis.tempo) as u64);
        let track_end =
            tokio::time::Instant::now() + Duration::from_secs_f64(track.duration);
        let token = CancellationToken::new();
        *self.synthetic.lock().unwrap() = Some(token.clone());

        info!(
            "Arming synthetic beats for '{}' every {:?} ({} rules)",
            track.title,
            beat_interval,
            beat_rules.len()
        );
        for rule in beat_rules {
            let Some(engine) = self.weak_self.upgrade() else {
                return;
            };
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(
                    tokio::time::Instant::now() + beat_interval,
                    beat_interval,
                );
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep_until(track_end) => break,
                        _ = ticker.tick() => {
                            if let Some(action) = rule.actions.first() {
                                if let Err(e) = engine.execute_action(action, 0).await {
                                    warn!("Synthetic beat action failed: {}", e);
                                }
                            }
                        }
                    }
                }
            });
        }
    }

    #[cfg(test)]
    fn has_scheduled_job(&self, id: &str) -> bool {
        self.jobs.contains(id)
    }
}

fn trigger_matches(trigger: &Trigger, event: &HubEvent) -> bool {
    match (trigger, event) {
        (Trigger::Mood { mood }, HubEvent::MoodChanged { mood: changed }) => mood == changed,
        (Trigger::Beat, HubEvent::Beat(_)) => true,
        (Trigger::Downbeat, HubEvent::Downbeat(_)) => true,
        (Trigger::Section, HubEvent::SectionChange(_)) => true,
        (Trigger::SectionType { section_type }, HubEvent::SectionMarker(marker)) => {
            *section_type == marker.section_type
        }
        (Trigger::Gesture { device_id, pattern }, HubEvent::Gesture(gesture)) => {
            *device_id == gesture.device_id && *pattern == gesture.pattern
        }
        _ => false,
    }
}
