// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Alerting - rule schema, events, evaluation engine and delivery

mod audio;
mod dispatcher;
mod engine;

pub use audio::{
    AudioClip, AudioSink, CachedTts, ConsoleSink, RenderedSpeech, SpeechSynthesizer,
    TextToSpeech, ToneSynthesizer,
};
pub use dispatcher::{AlertDispatcher, DispatcherConfig, QueuedAlert};
pub use engine::{EngineInput, EvalContext, Observation, RuleEngine, TickBatch};

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert priority, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Distance comparison against a named reference point. `Between` is
/// inclusive on both bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DistanceCheck {
    LessThan { value: f64 },
    GreaterThan { value: f64 },
    Between { low: f64, high: f64 },
}

impl DistanceCheck {
    pub fn matches(&self, distance: f64) -> bool {
        match self {
            DistanceCheck::LessThan { value } => distance < *value,
            DistanceCheck::GreaterThan { value } => distance > *value,
            DistanceCheck::Between { low, high } => distance >= *low && distance <= *high,
        }
    }
}

/// One rule condition. Conditions on a rule are AND-combined and must
/// hold simultaneously on the current tick's data. A closed enum keeps
/// evaluation exhaustive at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Local time-of-day window; start > end wraps overnight
    TimeOfDay { start: NaiveTime, end: NaiveTime },
    DayOfWeek { days: Vec<Weekday> },
    /// Restrict to these cameras
    Camera { ids: Vec<String> },
    ObjectClass { class: String },
    ConfidenceAbove { min: f32 },
    /// Compare the track's distance to a named reference point. A
    /// reference absent from the measurement evaluates false, not error.
    Distance {
        reference: String,
        check: DistanceCheck,
    },
    /// Track center inside a named polygon of the camera
    InZone { zone: String },
    /// Bounds on how long the track has existed, in seconds
    TrackDuration {
        #[serde(default)]
        min_secs: Option<f64>,
        #[serde(default)]
        max_secs: Option<f64>,
    },
    /// Holds while the named camera is inside its silence window
    CameraOffline { camera_id: String },
}

/// One step of a sequence rule: a condition set that must hold
/// continuously for `hold_secs` before the sequence advances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub hold_secs: f64,
}

/// Cooldown bookkeeping granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One cooldown per rule: a second object during the window stays quiet
    #[default]
    Rule,
    /// Cooldown per rule and track: new objects re-alert
    RuleAndTrack,
}

/// Log severity for the log action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

/// Action executed when a rule fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    /// Speak a message on the named sinks ("all" fans out to every sink)
    AudioAlert {
        message: String,
        #[serde(default = "default_sinks")]
        sinks: Vec<String>,
    },
    /// Persist the triggering frame via the storage collaborator
    Snapshot,
    Log {
        #[serde(default)]
        severity: LogSeverity,
    },
    /// POST the event to an external endpoint
    Webhook { url: String },
}

fn default_sinks() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u64 {
    60
}

fn default_hourly_cap() -> u32 {
    10
}

/// A configured alert rule. Read-only at evaluation time; all mutable
/// state (cooldowns, sequence progress) lives in the rule engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique name, also the cooldown bookkeeping key
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub priority: Priority,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Non-empty makes this a sequence rule; `conditions` then acts as a
    /// standing guard evaluated alongside every step
    #[serde(default)]
    pub sequence: Vec<SequenceStep>,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_hourly_cap")]
    pub max_alerts_per_hour: u32,
    #[serde(default)]
    pub cooldown_scope: CooldownScope,
    pub actions: Vec<AlertAction>,
}

/// A fired alert. Created once per trigger, never mutated, consumed
/// exactly once by the dispatcher. `track_id` is None only for
/// camera-offline triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub track_id: Option<u64>,
    pub priority: Priority,
    pub message: String,
    pub actions: Vec<AlertAction>,
}

/// Context captured at trigger time for message templating
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    pub camera_id: String,
    pub track_id: Option<u64>,
    pub class: Option<String>,
    /// First matched distance condition: reference name and measured meters
    pub reference: Option<(String, f64)>,
}

/// Substitute `{camera}`, `{track_id}`, `{class}`, `{reference}` and
/// `{distance}` placeholders
pub fn render_message(template: &str, ctx: &TriggerContext) -> String {
    let mut out = template.replace("{camera}", &ctx.camera_id);
    out = out.replace(
        "{track_id}",
        &ctx.track_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    out = out.replace("{class}", ctx.class.as_deref().unwrap_or("object"));
    if let Some((name, meters)) = &ctx.reference {
        out = out.replace("{reference}", name);
        out = out.replace("{distance}", &format!("{:.1}", meters));
    } else {
        out = out.replace("{reference}", "");
        out = out.replace("{distance}", "");
    }
    out
}
