// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Watchbarn - Multi-Camera Perimeter Watch System
//!
//! Continuous multi-camera monitoring with identity-stable object
//! tracking, distance-aware alert rules, and spoken alert delivery:
//! - One supervised capture task per camera with bounded frame queues
//! - IoU association via optimal assignment, deterministic identities
//! - Ground-plane distance annotation against surveyed reference points
//! - Stateful rule engine: cooldowns, hourly caps, sequence rules
//! - Per-sink audio delivery with TTS caching and bounded retry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Watchbarn Engine                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐  ┌──────────┐  ┌─────────┐  ┌──────────────┐   │
//! │  │ Camera  │→ │ Detector │→ │ Tracker │→ │ Distance     │   │
//! │  │ Manager │  │ (trait)  │  │ per cam │  │ Annotator    │   │
//! │  └─────────┘  └──────────┘  └─────────┘  └──────────────┘   │
//! │       ↓ bounded queues          merged stream ↓              │
//! │  ┌─────────────────────┐   ┌───────────────────────────┐    │
//! │  │     Event Bus       │   │  Rule Engine → Dispatcher │    │
//! │  └─────────────────────┘   └───────────────────────────┘    │
//! │       ↓                             ↓            ↓          │
//! │  ┌─────────┐                  ┌──────────┐  ┌──────────┐    │
//! │  │ Database│                  │ TTS+Cache│  │  Sinks   │    │
//! │  └─────────┘                  └──────────┘  └──────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod alerts;
pub mod capture;
pub mod config;
pub mod core;
pub mod db;
pub mod detect;
pub mod distance;
pub mod error;
pub mod tracking;

// Re-exports for convenience
pub use alerts::{AlertEvent, AlertRule, RuleEngine};
pub use capture::{CameraManager, Frame, FrameSource};
pub use config::Config;
pub use crate::core::{Engine, EventBus, PipelineMetrics};
pub use db::Database;
pub use detect::{Detection, Detector};
pub use distance::DistanceMeasurement;
pub use error::Error;
pub use tracking::{CameraTracker, Track, TrackState};

/// Watchbarn version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Watchbarn name
pub const NAME: &str = "Watchbarn";
