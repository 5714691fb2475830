// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Alert dispatcher - drains the alert queue and drives delivery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::audio::{AudioClip, AudioSink, TextToSpeech};
use super::{AlertAction, AlertEvent, LogSeverity};
use crate::capture::ImageHandle;
use crate::core::PipelineMetrics;
use crate::db::AlertStore;

/// Delivery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Delivery attempts per sink before giving up
    pub max_retries: u32,

    /// Linear backoff unit between attempts, milliseconds
    pub retry_backoff_ms: u64,

    /// Per-attempt sink send timeout, milliseconds
    pub send_timeout_ms: u64,

    /// Shutdown drain window before queued alerts are discarded
    pub drain_grace_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
            send_timeout_ms: 5000,
            drain_grace_ms: 5000,
        }
    }
}

/// An alert queued for delivery, paired with the triggering frame's
/// image so the snapshot action can reach storage
#[derive(Debug, Clone)]
pub struct QueuedAlert {
    pub event: AlertEvent,
    pub image: Option<ImageHandle>,
}

/// Executes each event's action list without ever blocking the upstream
/// pipeline: audio goes out sequentially per sink and concurrently
/// across sinks, storage and webhook calls are fire-and-forget, and a
/// dead sink costs bounded retries, never other events.
pub struct AlertDispatcher {
    config: DispatcherConfig,
    tts: Arc<dyn TextToSpeech>,
    sinks: HashMap<String, Arc<dyn AudioSink>>,
    store: Option<Arc<dyn AlertStore>>,
    http: reqwest::Client,
    metrics: Arc<PipelineMetrics>,
}

impl AlertDispatcher {
    pub fn new(
        config: DispatcherConfig,
        tts: Arc<dyn TextToSpeech>,
        sinks: Vec<Arc<dyn AudioSink>>,
        store: Option<Arc<dyn AlertStore>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let sinks = sinks
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        Self {
            config,
            tts,
            sinks,
            store,
            http: reqwest::Client::new(),
            metrics,
        }
    }

    /// Drain the alert queue until shutdown, then finish in-flight work
    /// within the grace window and discard (with logging) whatever is
    /// still queued.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<QueuedAlert>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Alert dispatcher started: {} sinks", self.sinks.len());

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(item) => self.dispatch(item).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    let deadline =
                        tokio::time::Instant::now() + Duration::from_millis(self.config.drain_grace_ms);
                    loop {
                        match tokio::time::timeout_at(deadline, rx.recv()).await {
                            Ok(Some(item)) => self.dispatch(item).await,
                            Ok(None) => break,
                            Err(_) => {
                                while let Ok(item) = rx.try_recv() {
                                    warn!(
                                        "Discarding undelivered alert '{}' at shutdown",
                                        item.event.rule_name
                                    );
                                    self.metrics.inc(&self.metrics.alerts_discarded);
                                }
                                break;
                            }
                        }
                    }
                    break;
                }
            }
        }

        info!("Alert dispatcher stopped");
    }

    /// Execute one event's action list
    pub async fn dispatch(&self, item: QueuedAlert) {
        let event = &item.event;
        info!(
            "Dispatching alert '{}' [{:?}] from camera {}",
            event.rule_name, event.priority, event.camera_id
        );

        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let ev = event.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = store.record_alert(&ev) {
                    warn!("Failed to record alert '{}': {}", ev.rule_name, e);
                }
            });
        }

        // Group audio deliveries: per-sink lists stay in action order so
        // one speaker never garbles two messages, while distinct sinks
        // are driven concurrently.
        let mut groups: Vec<(Arc<dyn AudioSink>, Vec<AudioClip>)> = Vec::new();

        for action in &event.actions {
            match action {
                AlertAction::AudioAlert { message, sinks } => {
                    let rendered = match self.tts.render(message).await {
                        Ok(r) => {
                            debug!(
                                "TTS render for '{}': cache_hit={}",
                                message, r.cache_hit
                            );
                            r.clip
                        }
                        Err(e) => {
                            warn!("TTS render failed for '{}': {}", message, e);
                            self.metrics.inc(&self.metrics.alerts_failed);
                            continue;
                        }
                    };
                    for sink in self.resolve_sinks(sinks) {
                        match groups.iter_mut().find(|(s, _)| s.name() == sink.name()) {
                            Some((_, clips)) => clips.push(rendered.clone()),
                            None => groups.push((sink, vec![rendered.clone()])),
                        }
                    }
                }
                AlertAction::Snapshot => self.spawn_snapshot(&item),
                AlertAction::Log { severity } => log_action(*severity, event),
                AlertAction::Webhook { url } => self.spawn_webhook(url, event),
            }
        }

        let deliveries = groups.into_iter().map(|(sink, clips)| async move {
            for clip in clips {
                self.deliver_with_retry(sink.as_ref(), &clip).await;
            }
        });
        futures::future::join_all(deliveries).await;
    }

    fn resolve_sinks(&self, names: &[String]) -> Vec<Arc<dyn AudioSink>> {
        if names.iter().any(|n| n == "all") {
            let mut all: Vec<_> = self.sinks.values().cloned().collect();
            all.sort_by(|a, b| a.name().cmp(b.name()));
            return all;
        }
        names
            .iter()
            .filter_map(|name| match self.sinks.get(name) {
                Some(sink) => Some(Arc::clone(sink)),
                None => {
                    warn!("Unknown audio sink '{}'", name);
                    None
                }
            })
            .collect()
    }

    /// Bounded retries with linear backoff; giving up is logged, never
    /// propagated.
    async fn deliver_with_retry(&self, sink: &dyn AudioSink, clip: &AudioClip) {
        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);

        for attempt in 1..=self.config.max_retries {
            match timeout(send_timeout, sink.send(clip)).await {
                Ok(Ok(())) => {
                    debug!("Delivered to sink '{}' (attempt {})", sink.name(), attempt);
                    self.metrics.inc(&self.metrics.alerts_delivered);
                    return;
                }
                Ok(Err(e)) => warn!(
                    "Delivery to '{}' failed (attempt {}/{}): {}",
                    sink.name(),
                    attempt,
                    self.config.max_retries,
                    e
                ),
                Err(_) => warn!(
                    "Delivery to '{}' timed out (attempt {}/{})",
                    sink.name(),
                    attempt,
                    self.config.max_retries
                ),
            }

            if attempt < self.config.max_retries {
                sleep(Duration::from_millis(
                    self.config.retry_backoff_ms * attempt as u64,
                ))
                .await;
            }
        }

        error!(
            "{}",
            crate::error::Error::Delivery {
                sink: sink.name().to_string(),
                message: format!("retries exhausted after {} attempts", self.config.max_retries),
            }
        );
        self.metrics.inc(&self.metrics.alerts_failed);
    }

    fn spawn_snapshot(&self, item: &QueuedAlert) {
        let (store, image) = match (&self.store, &item.image) {
            (Some(store), Some(image)) => (Arc::clone(store), Arc::clone(image)),
            _ => {
                debug!("Snapshot action skipped: no store or no image");
                return;
            }
        };
        let event = item.event.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save_snapshot(&event.camera_id, &image, &event) {
                warn!("Snapshot for '{}' failed: {}", event.rule_name, e);
            }
        });
    }

    fn spawn_webhook(&self, url: &str, event: &AlertEvent) {
        let client = self.http.clone();
        let url = url.to_string();
        let payload = serde_json::json!({
            "alert_rule": event.rule_name,
            "timestamp": event.timestamp.to_rfc3339(),
            "camera_id": event.camera_id,
            "track_id": event.track_id,
            "message": event.message,
            "severity": format!("{:?}", event.priority),
        });
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&payload)
                .timeout(Duration::from_secs(10))
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Webhook delivered to {}", url)
                }
                Ok(resp) => warn!("Webhook to {} returned {}", url, resp.status()),
                Err(e) => warn!("Webhook to {} failed: {}", url, e),
            }
        });
    }
}

fn log_action(severity: LogSeverity, event: &AlertEvent) {
    match severity {
        LogSeverity::Info => info!("{}", event.message),
        LogSeverity::Warning => warn!("{}", event.message),
        LogSeverity::Error | LogSeverity::Critical => error!("{}", event.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{CachedTts, Priority, ToneSynthesizer};
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct RecordingSink {
        name: String,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, clip: &AudioClip) -> anyhow::Result<()> {
            self.sent.lock().push(clip.text.clone());
            Ok(())
        }
    }

    struct FlakySink {
        name: String,
        failures_left: Arc<Mutex<u32>>,
        attempts: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl AudioSink for FlakySink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _clip: &AudioClip) -> anyhow::Result<()> {
            *self.attempts.lock() += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                bail!("speaker unreachable");
            }
            Ok(())
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
            send_timeout_ms: 500,
            drain_grace_ms: 200,
        }
    }

    fn tts() -> Arc<dyn TextToSpeech> {
        Arc::new(CachedTts::new(Box::new(ToneSynthesizer), 16))
    }

    fn audio_event(messages: &[&str], sinks: Vec<String>) -> QueuedAlert {
        QueuedAlert {
            event: AlertEvent {
                id: Uuid::new_v4(),
                rule_name: "Test Rule".to_string(),
                timestamp: Utc::now(),
                camera_id: "front".to_string(),
                track_id: Some(1),
                priority: Priority::High,
                message: messages.first().unwrap_or(&"").to_string(),
                actions: messages
                    .iter()
                    .map(|m| AlertAction::AudioAlert {
                        message: m.to_string(),
                        sinks: sinks.clone(),
                    })
                    .collect(),
            },
            image: None,
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let attempts = Arc::new(Mutex::new(0));
        let sink = Arc::new(FlakySink {
            name: "porch".to_string(),
            failures_left: Arc::new(Mutex::new(1)),
            attempts: Arc::clone(&attempts),
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher =
            AlertDispatcher::new(config(), tts(), vec![sink], None, Arc::clone(&metrics));

        dispatcher
            .dispatch(audio_event(&["hello"], vec!["porch".to_string()]))
            .await;

        assert_eq!(*attempts.lock(), 2);
        assert_eq!(
            metrics
                .alerts_delivered
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_dead_sink_does_not_starve_healthy_one() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let healthy = Arc::new(RecordingSink {
            name: "garage".to_string(),
            sent: Arc::clone(&sent),
        });
        let dead = Arc::new(FlakySink {
            name: "porch".to_string(),
            failures_left: Arc::new(Mutex::new(u32::MAX)),
            attempts: Arc::new(Mutex::new(0)),
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = AlertDispatcher::new(
            config(),
            tts(),
            vec![healthy, dead],
            None,
            Arc::clone(&metrics),
        );

        dispatcher
            .dispatch(audio_event(&["warning"], vec!["all".to_string()]))
            .await;

        assert_eq!(sent.lock().as_slice(), &["warning".to_string()]);
        assert_eq!(
            metrics
                .alerts_failed
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_same_sink_messages_stay_ordered() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink {
            name: "porch".to_string(),
            sent: Arc::clone(&sent),
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = AlertDispatcher::new(config(), tts(), vec![sink], None, metrics);

        dispatcher
            .dispatch(audio_event(
                &["first message", "second message"],
                vec!["porch".to_string()],
            ))
            .await;

        assert_eq!(
            sent.lock().as_slice(),
            &["first message".to_string(), "second message".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_sink_is_skipped() {
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher =
            AlertDispatcher::new(config(), tts(), vec![], None, Arc::clone(&metrics));

        dispatcher
            .dispatch(audio_event(&["nobody hears this"], vec!["ghost".to_string()]))
            .await;

        assert_eq!(
            metrics
                .alerts_delivered
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }

    #[tokio::test]
    async fn test_run_delivers_then_stops_on_shutdown() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink {
            name: "porch".to_string(),
            sent: Arc::clone(&sent),
        });
        let metrics = Arc::new(PipelineMetrics::new());
        let dispatcher = AlertDispatcher::new(config(), tts(), vec![sink], None, metrics);

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(dispatcher.run(rx, shutdown_tx.subscribe()));

        tx.send(audio_event(&["queued"], vec!["porch".to_string()]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
        handle.await.unwrap();

        assert_eq!(sent.lock().as_slice(), &["queued".to_string()]);
    }
}
