// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Camera manager - capture tasks, reconnection, and the silence watchdog

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{CameraHealth, CameraStatus, Frame, FrameSource};
use crate::core::EventBus;

const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Owns one capture task per camera. Each task holds its own source,
/// reconnects with capped exponential backoff, and pushes frames into a
/// bounded per-camera queue. A full queue overwrites the oldest frame so
/// capture is never blocked; the watchdog reports cameras that go quiet.
pub struct CameraManager {
    queue_size: usize,
    read_timeout: Duration,
    silence_window: Duration,
    event_bus: Arc<EventBus>,
    health: Arc<RwLock<HashMap<String, CameraHealth>>>,
    frame_txs: HashMap<String, broadcast::Sender<Frame>>,
    pending: Vec<Box<dyn FrameSource>>,
    tasks: Vec<JoinHandle<()>>,
}

impl CameraManager {
    pub fn new(
        queue_size: usize,
        read_timeout: Duration,
        silence_window: Duration,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            queue_size: queue_size.max(1),
            read_timeout,
            silence_window,
            event_bus,
            health: Arc::new(RwLock::new(HashMap::new())),
            frame_txs: HashMap::new(),
            pending: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Register a camera source. Must be called before `start`.
    pub fn add_camera(&mut self, source: Box<dyn FrameSource>) {
        let id = source.id().to_string();
        let (tx, _) = broadcast::channel(self.queue_size);
        self.frame_txs.insert(id.clone(), tx);
        self.health.write().insert(id.clone(), CameraHealth::new(&id));
        self.pending.push(source);
        info!("Registered camera: {}", id);
    }

    /// Subscribe to a camera's frame queue. Lag on this receiver is the
    /// drop-oldest policy in action; the consumer counts the lagged frames.
    pub fn subscribe(&self, camera_id: &str) -> Option<broadcast::Receiver<Frame>> {
        self.frame_txs.get(camera_id).map(|tx| tx.subscribe())
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.frame_txs.keys().cloned().collect()
    }

    pub fn get_health(&self, camera_id: &str) -> Option<CameraHealth> {
        self.health.read().get(camera_id).cloned()
    }

    pub fn all_health(&self) -> Vec<CameraHealth> {
        self.health.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.health
            .read()
            .values()
            .filter(|h| h.status == CameraStatus::Online)
            .count()
    }

    /// Credit dropped frames back to a camera's health record
    pub fn record_dropped(&self, camera_id: &str, count: u64) {
        if let Some(h) = self.health.write().get_mut(camera_id) {
            h.frames_dropped += count;
        }
    }

    /// Spawn one supervised capture task per registered camera plus the
    /// silence watchdog. Tasks exit on the shutdown signal.
    pub fn start(&mut self, shutdown: &broadcast::Sender<()>) {
        for source in self.pending.drain(..) {
            let id = source.id().to_string();
            let tx = match self.frame_txs.get(&id) {
                Some(tx) => tx.clone(),
                None => continue,
            };
            let health = Arc::clone(&self.health);
            let event_bus = Arc::clone(&self.event_bus);
            let read_timeout = self.read_timeout;
            let mut shutdown_rx = shutdown.subscribe();

            self.tasks.push(tokio::spawn(async move {
                let mut source = source;
                let mut restart_backoff = Duration::from_secs(1);
                loop {
                    let session = capture_session(
                        &mut source,
                        &tx,
                        &health,
                        &event_bus,
                        read_timeout,
                        &mut shutdown_rx,
                    );
                    match std::panic::AssertUnwindSafe(session).catch_unwind().await {
                        Ok(()) => break,
                        Err(_) => {
                            error!("Capture task for {} panicked, restarting", id);
                            match shutdown_rx.try_recv() {
                                Err(broadcast::error::TryRecvError::Empty) => {}
                                _ => break,
                            }
                            tokio::time::sleep(restart_backoff).await;
                            restart_backoff =
                                (restart_backoff * 2).min(RECONNECT_BACKOFF_MAX);
                        }
                    }
                }
            }));
        }

        // Silence watchdog
        let health = Arc::clone(&self.health);
        let event_bus = Arc::clone(&self.event_bus);
        let silence_window = self.silence_window;
        let mut shutdown_rx = shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(1));
            let mut all_down_reported = false;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let now = Utc::now();
                        let mut newly_silent = Vec::new();
                        let all_down;
                        {
                            let mut health = health.write();
                            for h in health.values_mut() {
                                if h.status != CameraStatus::Online {
                                    continue;
                                }
                                let quiet = h
                                    .last_frame
                                    .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default() > silence_window)
                                    .unwrap_or(false);
                                if quiet {
                                    h.status = CameraStatus::Silent;
                                    newly_silent.push(h.camera_id.clone());
                                }
                            }
                            // Connecting is excluded: cameras still in
                            // their first attempt are not failures yet.
                            all_down = !health.is_empty() && health.values().all(|h| {
                                h.status != CameraStatus::Online
                                    && h.status != CameraStatus::Connecting
                            });
                        }
                        for camera_id in newly_silent {
                            warn!("Camera {} silent for over {:?}", camera_id, silence_window);
                            event_bus.publish_camera_status(&camera_id, CameraStatus::Silent);
                        }
                        // Losing every camera at once is operator-facing
                        if all_down && !all_down_reported {
                            error!("All cameras are offline");
                            event_bus.publish_error("capture", "all cameras are offline");
                            all_down_reported = true;
                        } else if !all_down {
                            all_down_reported = false;
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));

        info!("Camera manager started: {} cameras", self.frame_txs.len());
    }

    /// Wait for all capture tasks to finish (after shutdown was signalled)
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// One connect-read-reconnect session for a single camera. Returns only
/// on shutdown; transport errors stay inside the backoff loop.
async fn capture_session(
    source: &mut Box<dyn FrameSource>,
    tx: &broadcast::Sender<Frame>,
    health: &Arc<RwLock<HashMap<String, CameraHealth>>>,
    event_bus: &Arc<EventBus>,
    read_timeout: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let camera_id = source.id().to_string();
    let mut backoff = Duration::from_secs(1);

    loop {
        set_status(health, event_bus, &camera_id, CameraStatus::Connecting);

        let connected = tokio::select! {
            res = source.connect() => res,
            _ = shutdown.recv() => return,
        };

        match connected {
            Ok(()) => {
                info!("Connected camera: {}", camera_id);
                set_status(health, event_bus, &camera_id, CameraStatus::Online);
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                warn!("Failed to connect camera {}: {}", camera_id, e);
                record_error(health, &camera_id, &e.to_string());
                set_status(health, event_bus, &camera_id, CameraStatus::Disconnected);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.recv() => return,
                }
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                continue;
            }
        }

        // Read until the stream fails or shutdown arrives
        loop {
            tokio::select! {
                res = tokio::time::timeout(read_timeout, source.next_frame()) => {
                    match res {
                        Ok(Ok(frame)) => {
                            {
                                let mut health = health.write();
                                if let Some(h) = health.get_mut(&camera_id) {
                                    h.frames_captured += 1;
                                    h.last_frame = Some(frame.timestamp);
                                    if h.status == CameraStatus::Silent {
                                        h.status = CameraStatus::Online;
                                    }
                                }
                            }
                            // Broadcast ring: a full queue overwrites the
                            // oldest frame instead of blocking this task.
                            let _ = tx.send(frame);
                        }
                        Ok(Err(e)) => {
                            warn!("Read error on camera {}: {}", camera_id, e);
                            record_error(health, &camera_id, &e.to_string());
                            break;
                        }
                        Err(_) => {
                            debug!("Read timeout on camera {}", camera_id);
                            record_error(health, &camera_id, "frame read timed out");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    if let Err(e) = source.disconnect().await {
                        warn!("Error disconnecting camera {}: {}", camera_id, e);
                    }
                    return;
                }
            }
        }

        // Reconnect path
        {
            let mut health = health.write();
            if let Some(h) = health.get_mut(&camera_id) {
                h.reconnects += 1;
            }
        }
        set_status(health, event_bus, &camera_id, CameraStatus::Disconnected);
        let _ = source.disconnect().await;

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.recv() => return,
        }
        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
    }
}

fn set_status(
    health: &Arc<RwLock<HashMap<String, CameraHealth>>>,
    event_bus: &Arc<EventBus>,
    camera_id: &str,
    status: CameraStatus,
) {
    let changed = {
        let mut health = health.write();
        match health.get_mut(camera_id) {
            Some(h) if h.status != status => {
                h.status = status;
                true
            }
            _ => false,
        }
    };
    if changed {
        event_bus.publish_camera_status(camera_id, status);
    }
}

fn record_error(
    health: &Arc<RwLock<HashMap<String, CameraHealth>>>,
    camera_id: &str,
    message: &str,
) {
    if let Some(h) = health.write().get_mut(camera_id) {
        h.last_error = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SimulatedCamera;

    #[tokio::test]
    async fn test_frames_flow_through_manager() {
        let event_bus = Arc::new(EventBus::new(16));
        let mut manager = CameraManager::new(
            8,
            Duration::from_secs(1),
            Duration::from_secs(5),
            event_bus,
        );
        manager.add_camera(Box::new(SimulatedCamera::new("cam-1", 200.0, 42)));

        let mut rx = manager.subscribe("cam-1").unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        manager.start(&shutdown_tx);

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("frame channel closed");
        assert_eq!(frame.camera_id, "cam-1");
        assert_eq!(frame.seq, 1);

        let _ = shutdown_tx.send(());
        manager.join().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_and_reports_lag() {
        let event_bus = Arc::new(EventBus::new(16));
        let mut manager = CameraManager::new(
            2,
            Duration::from_secs(1),
            Duration::from_secs(5),
            event_bus,
        );
        manager.add_camera(Box::new(SimulatedCamera::new("cam-1", 500.0, 9)));

        let mut rx = manager.subscribe("cam-1").unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        manager.start(&shutdown_tx);

        // Let the producer outrun a queue of two
        tokio::time::sleep(Duration::from_millis(100)).await;

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            Ok(_) => panic!("expected lag after sustained overload"),
            Err(e) => panic!("unexpected recv error: {}", e),
        }

        let _ = shutdown_tx.send(());
        manager.join().await;
    }
}
