// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Rule engine - stateful evaluation of alert rules over the track stream

use std::collections::{HashMap, HashSet, VecDeque};
use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, Utc, Weekday};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    render_message, AlertAction, AlertEvent, AlertRule, Condition, CooldownScope, QueuedAlert,
    TriggerContext,
};
use crate::capture::ImageHandle;
use crate::distance::{DistanceMeasurement, Zone};
use crate::tracking::TrackSnapshot;

/// One confirmed track paired with its distance measurement for this tick
#[derive(Debug, Clone)]
pub struct Observation {
    pub track: TrackSnapshot,
    pub distance: DistanceMeasurement,
}

/// Everything one camera tick produced for the rule engine
#[derive(Debug, Clone)]
pub struct TickBatch {
    pub camera_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub image: ImageHandle,
    pub observations: Vec<Observation>,
    /// Tracks deleted this tick; their sequence state is discarded
    pub removed: Vec<u64>,
}

/// Merged input stream: camera ticks plus silence notices
#[derive(Debug, Clone)]
pub enum EngineInput {
    Tick(TickBatch),
    CameraSilent {
        camera_id: String,
        since: DateTime<Utc>,
    },
}

/// Clock values for one evaluation pass. Injected rather than read from
/// the wall clock so tests control time exactly.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    pub local_time: NaiveTime,
    pub weekday: Weekday,
}

impl EvalContext {
    pub fn from_wall_clock() -> Self {
        let local = Local::now();
        Self {
            now: Utc::now(),
            local_time: local.time(),
            weekday: local.weekday(),
        }
    }

    pub fn at(now: DateTime<Utc>, local_time: NaiveTime, weekday: Weekday) -> Self {
        Self {
            now,
            local_time,
            weekday,
        }
    }
}

/// Progress of one sequence rule for one track
#[derive(Debug, Clone)]
struct SequenceState {
    step: usize,
    entered_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Evaluates the configured rules against the merged observation stream.
/// All trigger bookkeeping (cooldowns, trailing-hour log, sequence
/// automata) is owned here, so independent engines can be built in tests
/// and there is exactly one writer at runtime.
pub struct RuleEngine {
    rules: Vec<AlertRule>,
    /// Per-camera named zones for the in_zone condition
    zones: HashMap<String, Vec<Zone>>,
    /// Rules disabled at runtime after an evaluation fault
    disabled: HashSet<String>,
    /// Last trigger per cooldown key (rule, or rule+track per scope)
    last_trigger: HashMap<(String, Option<u64>), DateTime<Utc>>,
    /// Trailing-hour trigger log per rule
    trigger_log: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// Sequence progress per (rule, track)
    seq_states: HashMap<(String, u64), SequenceState>,
    /// Cameras currently inside their silence window
    offline: HashSet<String>,
}

impl RuleEngine {
    pub fn new(rules: Vec<AlertRule>, zones: HashMap<String, Vec<Zone>>) -> Self {
        Self {
            rules,
            zones,
            disabled: HashSet::new(),
            last_trigger: HashMap::new(),
            trigger_log: HashMap::new(),
            seq_states: HashMap::new(),
            offline: HashSet::new(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn disabled_count(&self) -> usize {
        self.disabled.len()
    }

    #[cfg(test)]
    fn sequence_state_count(&self) -> usize {
        self.seq_states.len()
    }

    /// Evaluate one input against every rule, in rule order. Returned
    /// alerts are in trigger order, which per rule is emission order.
    pub fn process(&mut self, input: EngineInput, ctx: &EvalContext) -> Vec<QueuedAlert> {
        match input {
            EngineInput::Tick(batch) => self.process_tick(batch, ctx),
            EngineInput::CameraSilent { camera_id, .. } => self.process_silence(&camera_id, ctx),
        }
    }

    fn process_tick(&mut self, batch: TickBatch, ctx: &EvalContext) -> Vec<QueuedAlert> {
        // Frames arriving means the camera is back
        self.offline.remove(&batch.camera_id);

        // Deleted tracks lose their sequence and per-track cooldown state
        for id in &batch.removed {
            self.seq_states.retain(|(_, tid), _| tid != id);
            self.last_trigger
                .retain(|(_, tid), _| tid.map_or(true, |t| t != *id));
        }

        let mut fired = Vec::new();
        for ri in 0..self.rules.len() {
            let rule = self.rules[ri].clone();
            if !rule.enabled || self.disabled.contains(&rule.name) {
                continue;
            }

            for obs in &batch.observations {
                let candidate = if rule.sequence.is_empty() {
                    self.eval_conditions(&rule.conditions, Some(obs), &batch.camera_id, ctx)
                } else {
                    self.advance_sequence(&rule, obs, &batch.camera_id, ctx)
                };

                match candidate {
                    Ok(Some(trigger)) => {
                        if let Some(event) = self.gate_and_fire(&rule, trigger, ctx) {
                            fired.push(QueuedAlert {
                                event,
                                image: Some(batch.image.clone()),
                            });
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.disable_rule(&rule.name, &e);
                        break;
                    }
                }
            }
        }
        fired
    }

    fn process_silence(&mut self, camera_id: &str, ctx: &EvalContext) -> Vec<QueuedAlert> {
        self.offline.insert(camera_id.to_string());

        let mut fired = Vec::new();
        for ri in 0..self.rules.len() {
            let rule = self.rules[ri].clone();
            if !rule.enabled || self.disabled.contains(&rule.name) || !rule.sequence.is_empty() {
                continue;
            }
            // Only rules that actually watch for camera loss react to a
            // silence notice.
            let watches_offline = rule
                .conditions
                .iter()
                .any(|c| matches!(c, Condition::CameraOffline { .. }));
            if !watches_offline {
                continue;
            }

            match self.eval_conditions(&rule.conditions, None, camera_id, ctx) {
                Ok(Some(trigger)) => {
                    if let Some(event) = self.gate_and_fire(&rule, trigger, ctx) {
                        fired.push(QueuedAlert { event, image: None });
                    }
                }
                Ok(None) => {}
                Err(e) => self.disable_rule(&rule.name, &e),
            }
        }
        fired
    }

    /// AND-combine a condition set. Ok(Some) carries the trigger context
    /// when every condition holds; Ok(None) is a normal miss. Err means a
    /// configuration-class fault that disables the rule.
    fn eval_conditions(
        &self,
        conditions: &[Condition],
        obs: Option<&Observation>,
        camera_id: &str,
        ctx: &EvalContext,
    ) -> Result<Option<TriggerContext>, String> {
        let mut matched_reference: Option<(String, f64)> = None;

        for condition in conditions {
            let holds = match condition {
                Condition::TimeOfDay { start, end } => {
                    in_time_window(ctx.local_time, *start, *end)
                }
                Condition::DayOfWeek { days } => days.contains(&ctx.weekday),
                Condition::Camera { ids } => ids.iter().any(|id| id == camera_id),
                Condition::ObjectClass { class } => {
                    obs.map(|o| o.track.class == *class).unwrap_or(false)
                }
                Condition::ConfidenceAbove { min } => {
                    obs.map(|o| o.track.confidence >= *min).unwrap_or(false)
                }
                Condition::Distance { reference, check } => match obs {
                    // A reference missing from the measurement is false,
                    // not an error.
                    Some(o) => match o.distance.references.get(reference) {
                        Some(d) if check.matches(*d) => {
                            if matched_reference.is_none() {
                                matched_reference = Some((reference.clone(), *d));
                            }
                            true
                        }
                        _ => false,
                    },
                    None => false,
                },
                Condition::InZone { zone } => match obs {
                    Some(o) => {
                        let zones = self.zones.get(camera_id);
                        let found = zones.and_then(|zs| zs.iter().find(|z| z.name == *zone));
                        match found {
                            Some(z) => z.contains(o.track.center),
                            None => {
                                return Err(format!(
                                    "zone '{}' is not defined for camera '{}'",
                                    zone, camera_id
                                ))
                            }
                        }
                    }
                    None => false,
                },
                Condition::TrackDuration { min_secs, max_secs } => match obs {
                    Some(o) => {
                        let secs = ctx
                            .now
                            .signed_duration_since(o.track.first_seen)
                            .num_milliseconds() as f64
                            / 1000.0;
                        min_secs.map_or(true, |m| secs >= m)
                            && max_secs.map_or(true, |m| secs <= m)
                    }
                    None => false,
                },
                Condition::CameraOffline { camera_id: target } => self.offline.contains(target),
            };

            if !holds {
                return Ok(None);
            }
        }

        Ok(Some(TriggerContext {
            camera_id: camera_id.to_string(),
            track_id: obs.map(|o| o.track.id),
            class: obs.map(|o| o.track.class.clone()),
            reference: matched_reference,
        }))
    }

    /// Drive one sequence automaton for one track. Steps advance only
    /// after their condition set has held continuously for the hold
    /// duration since entry; any failure resets to step zero with no
    /// partial credit. Completion of the final step is the candidate
    /// trigger.
    fn advance_sequence(
        &mut self,
        rule: &AlertRule,
        obs: &Observation,
        camera_id: &str,
        ctx: &EvalContext,
    ) -> Result<Option<TriggerContext>, String> {
        let key = (rule.name.clone(), obs.track.id);

        // Standing guard conditions apply at every step
        if !rule.conditions.is_empty()
            && self
                .eval_conditions(&rule.conditions, Some(obs), camera_id, ctx)?
                .is_none()
        {
            self.seq_states.remove(&key);
            return Ok(None);
        }

        let mut state = self.seq_states.remove(&key).unwrap_or(SequenceState {
            step: 0,
            entered_at: ctx.now,
            last_seen: ctx.now,
        });

        loop {
            let step = &rule.sequence[state.step];
            match self.eval_conditions(&step.conditions, Some(obs), camera_id, ctx)? {
                Some(trigger) => {
                    state.last_seen = ctx.now;
                    let held = ctx
                        .now
                        .signed_duration_since(state.entered_at)
                        .num_milliseconds() as f64
                        / 1000.0;
                    if held < step.hold_secs {
                        self.seq_states.insert(key, state);
                        return Ok(None);
                    }
                    if state.step + 1 >= rule.sequence.len() {
                        debug!(
                            "Sequence '{}' completed for track {}",
                            rule.name, obs.track.id
                        );
                        return Ok(Some(trigger));
                    }
                    state.step += 1;
                    state.entered_at = ctx.now;
                    // Zero-hold steps may cascade within the tick
                }
                None => {
                    // Condition set failed before the hold elapsed:
                    // back to step zero, fresh entry time next match.
                    return Ok(None);
                }
            }
        }
    }

    /// Gating order per candidate trigger: cooldown, then the trailing
    /// 60-minute cap, then fire.
    fn gate_and_fire(
        &mut self,
        rule: &AlertRule,
        trigger: TriggerContext,
        ctx: &EvalContext,
    ) -> Option<AlertEvent> {
        let key = match rule.cooldown_scope {
            CooldownScope::Rule => (rule.name.clone(), None),
            CooldownScope::RuleAndTrack => (rule.name.clone(), trigger.track_id),
        };

        if let Some(last) = self.last_trigger.get(&key) {
            if ctx.now.signed_duration_since(*last)
                < Duration::seconds(rule.cooldown_secs as i64)
            {
                debug!("Rule '{}' suppressed by cooldown", rule.name);
                return None;
            }
        }

        let log = self.trigger_log.entry(rule.name.clone()).or_default();
        let window_start = ctx.now - Duration::hours(1);
        while log.front().map_or(false, |t| *t <= window_start) {
            log.pop_front();
        }
        if log.len() as u32 >= rule.max_alerts_per_hour {
            debug!("Rule '{}' suppressed by hourly cap", rule.name);
            return None;
        }

        log.push_back(ctx.now);
        self.last_trigger.insert(key, ctx.now);

        let actions: Vec<AlertAction> = rule
            .actions
            .iter()
            .map(|action| match action {
                AlertAction::AudioAlert { message, sinks } => AlertAction::AudioAlert {
                    message: render_message(message, &trigger),
                    sinks: sinks.clone(),
                },
                other => other.clone(),
            })
            .collect();

        let message = actions
            .iter()
            .find_map(|a| match a {
                AlertAction::AudioAlert { message, .. } => Some(message.clone()),
                _ => None,
            })
            .unwrap_or_else(|| {
                format!(
                    "{} triggered by {} on camera {}",
                    rule.name,
                    trigger.class.as_deref().unwrap_or("camera loss"),
                    trigger.camera_id
                )
            });

        warn!("Alert triggered: {} [{:?}]", rule.name, rule.priority);

        Some(AlertEvent {
            id: Uuid::new_v4(),
            rule_name: rule.name.clone(),
            timestamp: ctx.now,
            camera_id: trigger.camera_id.clone(),
            track_id: trigger.track_id,
            priority: rule.priority,
            message,
            actions,
        })
    }

    fn disable_rule(&mut self, name: &str, error: &str) {
        warn!("Disabling rule '{}' after evaluation error: {}", name, error);
        self.disabled.insert(name.to_string());
    }
}

/// Time-of-day window check; start > end wraps past midnight
fn in_time_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        now >= start || now <= end
    }
}
