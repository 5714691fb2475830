// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Engine - builds the collaborators and runs the capture-to-alert pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use super::{Event, EventBus, EventPayload, PipelineMetrics};
use crate::alerts::{
    AlertDispatcher, CachedTts, ConsoleSink, AudioSink, EngineInput, EvalContext, Observation,
    QueuedAlert, RuleEngine, TextToSpeech, TickBatch, ToneSynthesizer,
};
use crate::capture::{CameraManager, CameraStatus, Frame, FrameSource, SimulatedCamera};
use crate::config::{Config, SinkKind};
use crate::db::{AlertStore, Database};
use crate::detect::{Detector, SimulatedDetector};
use crate::distance::{annotate, CameraCalibration, DistanceMeasurement};
use crate::tracking::{CameraTracker, TrackState};

/// Owns the pipeline: one capture task per camera, one ordered processing
/// task per camera gated by a shared worker-pool semaphore, a single rule
/// engine consumer, and the dispatcher. Collaborator backends (detector,
/// TTS, sinks, sources, store) default to the built-in demo
/// implementations and can be swapped before `run`.
pub struct Engine {
    config: Arc<Config>,
    event_bus: Arc<EventBus>,
    metrics: Arc<PipelineMetrics>,
    detector: Arc<dyn Detector>,
    tts: Arc<dyn TextToSpeech>,
    sinks: Vec<Arc<dyn AudioSink>>,
    store: Option<Arc<dyn AlertStore>>,
    /// Injected frame sources consumed at `run`; cameras without one get
    /// a simulator
    sources: Mutex<Vec<Box<dyn FrameSource>>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let sinks: Vec<Arc<dyn AudioSink>> = config
            .audio
            .sinks
            .iter()
            .filter(|s| s.enabled)
            .map(|s| {
                if s.kind != SinkKind::Console {
                    warn!(
                        "Sink '{}' is {:?} but no backend was injected; using console output",
                        s.name, s.kind
                    );
                }
                Arc::new(ConsoleSink::new(&s.name)) as Arc<dyn AudioSink>
            })
            .collect();

        let store: Option<Arc<dyn AlertStore>> = if config.database.enabled {
            Some(Arc::new(Database::open(&config.database)?))
        } else {
            None
        };

        let tts: Arc<dyn TextToSpeech> = Arc::new(CachedTts::new(
            Box::new(ToneSynthesizer),
            config.audio.tts_cache_capacity,
        ));

        Ok(Self {
            config: Arc::new(config),
            event_bus: Arc::new(EventBus::new(256)),
            metrics: Arc::new(PipelineMetrics::new()),
            detector: Arc::new(SimulatedDetector::new()),
            tts,
            sinks,
            store,
            sources: Mutex::new(Vec::new()),
        })
    }

    /// Swap in a real detector backend
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    /// Swap in a real TTS backend
    pub fn with_tts(mut self, tts: Arc<dyn TextToSpeech>) -> Self {
        self.tts = tts;
        self
    }

    /// Replace the configured sinks with real backends
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn AudioSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Add a real frame source for one configured camera
    pub fn with_source(self, source: Box<dyn FrameSource>) -> Self {
        self.sources.lock().push(source);
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the pipeline until a shutdown signal arrives on `shutdown`,
    /// then drain each stage within its grace period.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let mut shutdown_rx = shutdown.subscribe();
        let config = &self.config;
        let grace = Duration::from_millis(config.pipeline.shutdown_grace_ms);

        info!(
            "Starting pipeline: {} cameras, {} workers, demo_mode={}",
            config.cameras.iter().filter(|c| c.enabled).count(),
            config.pipeline.worker_count(),
            config.demo_mode
        );

        let mut manager = CameraManager::new(
            config.pipeline.frame_queue_size,
            Duration::from_millis(config.pipeline.read_timeout_ms),
            Duration::from_secs(config.pipeline.silence_window_secs),
            Arc::clone(&self.event_bus),
        );

        let mut injected: HashMap<String, Box<dyn FrameSource>> = self
            .sources
            .lock()
            .drain(..)
            .map(|s| (s.id().to_string(), s))
            .collect();

        for camera in config.cameras.iter().filter(|c| c.enabled) {
            let source = match injected.remove(&camera.id) {
                Some(source) => source,
                None => {
                    if !config.demo_mode && !camera.url.starts_with("sim://") {
                        warn!(
                            "No frame source injected for camera '{}' ({}); running simulated",
                            camera.id, camera.url
                        );
                    }
                    Box::new(SimulatedCamera::new(
                        &camera.id,
                        camera.fps,
                        seed_for(&camera.id),
                    ))
                }
            };
            manager.add_camera(source);
        }

        let (batch_tx, batch_rx) = mpsc::channel::<EngineInput>(config.pipeline.batch_queue_size);
        let (alert_tx, alert_rx) = mpsc::channel::<QueuedAlert>(config.pipeline.alert_queue_size);

        manager.start(&shutdown);

        // Worker pool: per-camera tasks keep frame order, the semaphore
        // bounds how many cameras process concurrently.
        let semaphore = Arc::new(Semaphore::new(config.pipeline.worker_count()));
        let mut processors = Vec::new();
        for camera in config.cameras.iter().filter(|c| c.enabled) {
            let frames = match manager.subscribe(&camera.id) {
                Some(rx) => rx,
                None => continue,
            };
            processors.push(tokio::spawn(process_camera(
                camera.id.clone(),
                frames,
                Arc::clone(&self.detector),
                CameraTracker::new(&camera.id, config.tracking.clone()),
                camera.calibration.clone(),
                Arc::clone(&semaphore),
                batch_tx.clone(),
                Arc::clone(&self.metrics),
                self.store.clone(),
                Arc::clone(&self.event_bus),
                Duration::from_millis(config.pipeline.detector_timeout_ms),
                shutdown.subscribe(),
            )));
        }

        // Silence notices ride the same input stream as ticks so the
        // rule engine stays a single bookkeeping consumer.
        let bridge = tokio::spawn(bridge_camera_status(
            self.event_bus.subscribe(),
            batch_tx.clone(),
            shutdown.subscribe(),
        ));
        drop(batch_tx);

        let zones = config
            .cameras
            .iter()
            .map(|c| (c.id.clone(), c.zones.clone()))
            .collect();
        let rule_task = tokio::spawn(run_rule_engine(
            batch_rx,
            alert_tx,
            RuleEngine::new(config.alerts.rules.clone(), zones),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.metrics),
            shutdown.subscribe(),
        ));

        let dispatcher = AlertDispatcher::new(
            config.alerts.dispatcher.clone(),
            Arc::clone(&self.tts),
            self.sinks.clone(),
            self.store.clone(),
            Arc::clone(&self.metrics),
        );
        let dispatch_task = tokio::spawn(dispatcher.run(alert_rx, shutdown.subscribe()));

        // Periodic stats
        let stats_task = {
            let metrics = Arc::clone(&self.metrics);
            let mut shutdown_rx = shutdown.subscribe();
            let period = Duration::from_secs(config.pipeline.stats_interval_secs.max(1));
            tokio::spawn(async move {
                let mut tick = interval(period);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let s = metrics.summary();
                            info!(
                                "Stats: frames={} fps={:.1} dropped={} detections={} alerts={} delivered={}",
                                s.frames_processed, s.fps, s.frames_dropped,
                                s.detections, s.alerts_triggered, s.alerts_delivered
                            );
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            })
        };

        info!("Pipeline running");
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining pipeline...");

        manager.join().await;
        for task in processors {
            if timeout(grace, task).await.is_err() {
                warn!("Processor did not finish within the grace period");
            }
        }
        let _ = timeout(grace, bridge).await;
        if timeout(grace, rule_task).await.is_err() {
            warn!("Rule engine did not finish within the grace period");
        }
        if timeout(grace * 2, dispatch_task).await.is_err() {
            warn!("Dispatcher did not finish within the grace period");
        }
        let _ = timeout(grace, stats_task).await;

        let s = self.metrics.summary();
        info!(
            "Pipeline stopped: {} frames processed, {} dropped, {} alerts triggered, {} delivered, {} discarded",
            s.frames_processed, s.frames_dropped, s.alerts_triggered, s.alerts_delivered, s.alerts_discarded
        );

        Ok(())
    }
}

fn seed_for(camera_id: &str) -> u64 {
    camera_id
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64))
}

/// One camera's ordered processing loop: detect, track, annotate, hand
/// the batch to the rule engine. Frames for this camera are handled
/// strictly in seq order; the semaphore keeps total concurrency at the
/// worker pool size.
#[allow(clippy::too_many_arguments)]
async fn process_camera(
    camera_id: String,
    mut frames: broadcast::Receiver<Frame>,
    detector: Arc<dyn Detector>,
    mut tracker: CameraTracker,
    calibration: Option<CameraCalibration>,
    semaphore: Arc<Semaphore>,
    batch_tx: mpsc::Sender<EngineInput>,
    metrics: Arc<PipelineMetrics>,
    store: Option<Arc<dyn AlertStore>>,
    event_bus: Arc<EventBus>,
    detector_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            res = frames.recv() => match res {
                Ok(frame) => {
                    let permit = match semaphore.acquire().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };

                    let detections = match timeout(detector_timeout, detector.detect(&frame)).await {
                        Ok(Ok(d)) => d,
                        Ok(Err(e)) => {
                            warn!("{} on {}", crate::error::Error::Detector(e.to_string()), camera_id);
                            metrics.inc(&metrics.detector_failures);
                            continue;
                        }
                        Err(_) => {
                            warn!("Detector timed out on {} (seq {})", camera_id, frame.seq);
                            metrics.inc(&metrics.detector_failures);
                            continue;
                        }
                    };
                    metrics.add(&metrics.detections, detections.len() as u64);

                    let tick = tracker.update(Utc::now(), &detections);
                    metrics.inc(&metrics.frames_processed);
                    metrics.add(&metrics.tracks_removed, tick.removed.len() as u64);
                    for id in &tick.removed {
                        event_bus.publish_track_lost(&camera_id, *id);
                    }

                    let observations: Vec<Observation> = tick
                        .live
                        .iter()
                        .filter(|t| t.state == TrackState::Confirmed)
                        .map(|t| {
                            let distance = match &calibration {
                                Some(cal) => annotate(t, cal),
                                None => DistanceMeasurement {
                                    track_id: t.id,
                                    distance_to_camera: None,
                                    references: HashMap::new(),
                                    confidence: 0.0,
                                },
                            };
                            Observation {
                                track: t.clone(),
                                distance,
                            }
                        })
                        .collect();

                    for obs in observations.iter().filter(|o| o.track.newly_confirmed) {
                        metrics.inc(&metrics.tracks_confirmed);
                        if let Some(store) = &store {
                            let store = Arc::clone(store);
                            let camera_id = camera_id.clone();
                            let track = obs.track.clone();
                            let distance = obs.distance.clone();
                            tokio::task::spawn_blocking(move || {
                                if let Err(e) =
                                    store.record_track_event(&camera_id, &track, Some(&distance))
                                {
                                    debug!("Track event not recorded: {}", e);
                                }
                            });
                        }
                    }

                    drop(permit);

                    let batch = EngineInput::Tick(TickBatch {
                        camera_id: camera_id.clone(),
                        seq: frame.seq,
                        timestamp: frame.timestamp,
                        image: Arc::clone(&frame.image),
                        observations,
                        removed: tick.removed,
                    });
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Camera {} queue overflowed, dropped {} frames", camera_id, n);
                    metrics.add(&metrics.frames_dropped, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// The single rule-engine consumer: exact cooldown and cap bookkeeping,
/// per-rule emission order preserved, backpressure from the alert queue.
async fn run_rule_engine(
    mut rx: mpsc::Receiver<EngineInput>,
    alert_tx: mpsc::Sender<QueuedAlert>,
    mut engine: RuleEngine,
    event_bus: Arc<EventBus>,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(input) => {
                    let ctx = EvalContext::from_wall_clock();
                    for alert in engine.process(input, &ctx) {
                        metrics.inc(&metrics.alerts_triggered);
                        event_bus.publish_alert(
                            &alert.event.rule_name,
                            alert.event.priority,
                            &alert.event.message,
                        );
                        // Bounded queue: waiting here is the designed
                        // backpressure on rule evaluation.
                        if alert_tx.send(alert).await.is_err() {
                            return;
                        }
                    }
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Forward camera-silent statuses from the event bus into the rule
/// engine's input stream
async fn bridge_camera_status(
    mut events: broadcast::Receiver<Event>,
    batch_tx: mpsc::Sender<EngineInput>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            res = events.recv() => match res {
                Ok(event) => {
                    if let EventPayload::CameraStatus {
                        camera_id,
                        status: CameraStatus::Silent,
                    } = event.payload
                    {
                        let notice = EngineInput::CameraSilent {
                            camera_id,
                            since: event.timestamp,
                        };
                        if batch_tx.send(notice).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertAction, AlertRule, Condition, DistanceCheck, Priority};
    use crate::config::Config;

    fn demo_config() -> Config {
        let mut config = Config::default();
        config.demo_mode = true;
        config.database.enabled = false;
        config.cameras[0].fps = 120.0;
        config.tracking.min_hits = 2;
        config.pipeline.stats_interval_secs = 3600;
        // Always-on rule so the demo walker trips it
        config.alerts.rules = vec![AlertRule {
            name: "Person Near Door".to_string(),
            enabled: true,
            priority: Priority::High,
            conditions: vec![
                Condition::ObjectClass {
                    class: "person".to_string(),
                },
                Condition::Distance {
                    reference: "front_door".to_string(),
                    check: DistanceCheck::LessThan { value: 50.0 },
                },
            ],
            sequence: vec![],
            cooldown_secs: 1,
            max_alerts_per_hour: 1000,
            cooldown_scope: Default::default(),
            actions: vec![AlertAction::AudioAlert {
                message: "Person near {reference}".to_string(),
                sinks: vec!["all".to_string()],
            }],
        }];
        config
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_config() {
        let mut config = demo_config();
        config.alerts.rules[0].conditions.push(Condition::Distance {
            reference: "bogus".to_string(),
            check: DistanceCheck::LessThan { value: 1.0 },
        });
        assert!(Engine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_demo_pipeline_end_to_end() {
        let engine = Engine::new(demo_config()).unwrap();
        let metrics = engine.metrics();
        let (shutdown_tx, _) = broadcast::channel(1);

        let stopper = {
            let shutdown_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                let _ = shutdown_tx.send(());
            })
        };

        engine.run(shutdown_tx).await.unwrap();
        stopper.await.unwrap();

        let s = metrics.summary();
        assert!(s.frames_processed > 0, "no frames processed");
        assert!(s.detections > 0, "no detections produced");
        assert!(s.alerts_triggered > 0, "no alerts triggered");
        assert!(s.alerts_delivered > 0, "no alerts delivered");
    }
}
