use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::SectionType;
use crate::mood::Mood;

/// What causes a rule to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    /// Cron expression, 5-field or 6-field (seconds first).
    Schedule { cron: String },
    Mood { mood: Mood },
    Beat,
    Downbeat,
    Section,
    #[serde(rename_all = "camelCase")]
    SectionType { section_type: SectionType },
    #[serde(rename_all = "camelCase")]
    Gesture { device_id: String, pattern: String },
    Presence,
}

/// A guard evaluated before a rule's actions run.
///
/// Unknown or failing conditions block execution; a condition that cannot
/// be evaluated counts as failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// Local wall-clock window, "HH:MM" inclusive bounds. A window with
    /// `end_time < start_time` wraps past midnight.
    #[serde(rename_all = "camelCase")]
    Time { start_time: String, end_time: String },
    Presence,
    Music { attribute: String, value: Value },
    #[serde(rename_all = "camelCase")]
    Device {
        device_id: String,
        attribute: String,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    Device {
        device_kind: String,
        device_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    Music {
        command: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
    #[serde(rename_all = "camelCase")]
    Scene { scene_id: String },
    Notification {
        title: String,
        message: String,
        #[serde(default = "default_priority")]
        priority: String,
    },
}

fn default_priority() -> String {
    "normal".to_string()
}

/// Outcome of a single action within a rule or scene run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(action: Action) -> Self {
        Self {
            action,
            success: true,
            error: None,
        }
    }

    pub fn failed(action: Action, error: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A stored automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    /// Owning user, when the deployment has accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Rule fields supplied by the caller; id and timestamp are assigned on
/// creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A named bundle of actions activated as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScene {
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub actions: Vec<Action>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_wire_tags() {
        let schedule: Trigger = serde_json::from_value(json!({
            "type": "schedule",
            "cron": "0 8 * * *",
        }))
        .unwrap();
        assert_eq!(
            schedule,
            Trigger::Schedule {
                cron: "0 8 * * *".to_string()
            }
        );

        let section_type: Trigger = serde_json::from_value(json!({
            "type": "sectionType",
            "sectionType": "chorus",
        }))
        .unwrap();
        assert_eq!(
            section_type,
            Trigger::SectionType {
                section_type: SectionType::Chorus
            }
        );

        assert_eq!(
            serde_json::to_value(Trigger::Downbeat).unwrap(),
            json!({"type": "downbeat"})
        );
    }

    #[test]
    fn rule_deserializes_with_defaults() {
        let rule: NewRule = serde_json::from_value(json!({
            "name": "Morning lights",
            "trigger": {"type": "schedule", "cron": "0 8 * * *"},
            "actions": [
                {
                    "type": "device",
                    "deviceKind": "light",
                    "deviceId": "living-room",
                    "command": "on",
                }
            ],
        }))
        .unwrap();

        assert!(rule.enabled);
        assert!(rule.conditions.is_empty());
        assert_eq!(
            rule.actions[0],
            Action::Device {
                device_kind: "light".to_string(),
                device_id: "living-room".to_string(),
                command: "on".to_string(),
                value: None,
            }
        );
    }

    #[test]
    fn action_result_serializes_flat() {
        let result = ActionResult::failed(
            Action::Music {
                command: "play".to_string(),
                params: Value::Null,
            },
            "no active player",
        );
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["error"], "no active player");
        assert_eq!(wire["action"]["type"], "music");
    }

    #[test]
    fn notification_priority_defaults_to_normal() {
        let action: Action = serde_json::from_value(json!({
            "type": "notification",
            "title": "Hello",
            "message": "World",
        }))
        .unwrap();
        match action {
            Action::Notification { priority, .. } => assert_eq!(priority, "normal"),
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
