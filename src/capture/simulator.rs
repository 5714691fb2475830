// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Camera simulator for demo/testing

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use anyhow::Result;
use chrono::Utc;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::{Frame, FrameSource};
use crate::error::Error;

/// Produces synthetic frames at a fixed rate. Seeded, so demo runs and
/// tests replay identically. The image payload is a small gray buffer;
/// nothing downstream inspects pixels.
pub struct SimulatedCamera {
    id: String,
    fps: f64,
    width: u32,
    height: u32,
    seq: u64,
    connected: bool,
    rng: ChaCha8Rng,
    /// Probability of a simulated transport error per read
    fault_probability: f64,
}

impl SimulatedCamera {
    pub fn new(id: &str, fps: f64, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            fps: fps.max(1.0),
            width: 1920,
            height: 1080,
            seq: 0,
            connected: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            fault_probability: 0.0,
        }
    }

    /// Inject transport faults (reconnect-path coverage)
    pub fn with_fault_probability(mut self, p: f64) -> Self {
        self.fault_probability = p;
        self
    }
}

#[async_trait]
impl FrameSource for SimulatedCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(Error::Capture {
                camera_id: self.id.clone(),
                message: "not connected".to_string(),
            }
            .into());
        }

        tokio::time::sleep(Duration::from_secs_f64(1.0 / self.fps)).await;

        if self.fault_probability > 0.0 && self.rng.gen::<f64>() < self.fault_probability {
            self.connected = false;
            return Err(Error::Capture {
                camera_id: self.id.clone(),
                message: "simulated stream fault".to_string(),
            }
            .into());
        }

        self.seq += 1;
        let luma = self.rng.gen::<u8>();

        Ok(Frame {
            camera_id: self.id.clone(),
            seq: self.seq,
            timestamp: Utc::now(),
            image: Arc::new(vec![luma; 64]),
            width: self.width,
            height: self.height,
        })
    }
}
