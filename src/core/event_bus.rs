// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Event bus for inter-component communication

use tokio::sync::broadcast;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::alerts::Priority;
use crate::capture::CameraStatus;

/// Event types in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventType {
    CameraStatus,
    Alert,
    TrackLost,
    Error,
}

/// Generic event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    CameraStatus {
        camera_id: String,
        status: CameraStatus,
    },
    Alert {
        rule_name: String,
        priority: Priority,
        message: String,
    },
    TrackLost {
        camera_id: String,
        track_id: u64,
    },
    Error {
        component: String,
        message: String,
    },
}

/// Central bus for pub/sub monitoring events. Slow subscribers lag;
/// the pipeline never waits for them.
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    event_counter: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            event_tx,
            event_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn publish_camera_status(&self, camera_id: &str, status: CameraStatus) {
        self.publish_event(
            EventType::CameraStatus,
            EventPayload::CameraStatus {
                camera_id: camera_id.to_string(),
                status,
            },
        );
    }

    pub fn publish_alert(&self, rule_name: &str, priority: Priority, message: &str) {
        self.publish_event(
            EventType::Alert,
            EventPayload::Alert {
                rule_name: rule_name.to_string(),
                priority,
                message: message.to_string(),
            },
        );
    }

    pub fn publish_track_lost(&self, camera_id: &str, track_id: u64) {
        self.publish_event(
            EventType::TrackLost,
            EventPayload::TrackLost {
                camera_id: camera_id.to_string(),
                track_id,
            },
        );
    }

    pub fn publish_error(&self, component: &str, message: &str) {
        self.publish_event(
            EventType::Error,
            EventPayload::Error {
                component: component.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn publish_event(&self, event_type: EventType, payload: EventPayload) {
        let id = self
            .event_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let event = Event {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}
