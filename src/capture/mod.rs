// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Frame capture - source trait, frame records, and per-camera health

mod manager;
mod simulator;

pub use manager::CameraManager;
pub use simulator::SimulatedCamera;

use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use anyhow::Result;

/// Opaque decoded-image handle. The pipeline never inspects pixel data;
/// it only moves the handle downstream for snapshots.
pub type ImageHandle = Arc<Vec<u8>>;

/// A decoded frame from one camera. Immutable after creation; `seq` is
/// strictly increasing per camera and never reused.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: String,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub image: ImageHandle,
    pub width: u32,
    pub height: u32,
}

/// One camera connection. Implementations own the transport and decoding;
/// `next_frame` may block on network I/O, which is why each source runs on
/// its own task. Frames must come back with monotonically increasing `seq`.
#[async_trait]
pub trait FrameSource: Send {
    /// Camera identifier this source produces frames for
    fn id(&self) -> &str;

    /// Open the underlying stream
    async fn connect(&mut self) -> Result<()>;

    /// Close the underlying stream
    async fn disconnect(&mut self) -> Result<()>;

    /// Read the next decoded frame
    async fn next_frame(&mut self) -> Result<Frame>;
}

/// Camera operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraStatus {
    Disconnected,
    Connecting,
    Online,
    /// Connected but no frames within the silence window
    Silent,
}

/// Per-camera health counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraHealth {
    pub camera_id: String,
    pub status: CameraStatus,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub reconnects: u64,
    pub last_frame: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CameraHealth {
    pub fn new(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            status: CameraStatus::Disconnected,
            frames_captured: 0,
            frames_dropped: 0,
            reconnects: 0,
            last_frame: None,
            last_error: None,
        }
    }
}
