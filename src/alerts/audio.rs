// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Audio collaborators - TTS rendering with cache and sink contracts

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use anyhow::Result;
use tracing::{debug, info};

/// Rendered speech audio. The pipeline treats the payload as opaque;
/// the text rides along for sinks that log instead of playing.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub text: String,
    pub data: Arc<Vec<u8>>,
}

/// Result of a TTS render: the clip plus whether it came from cache
#[derive(Debug, Clone)]
pub struct RenderedSpeech {
    pub clip: AudioClip,
    pub cache_hit: bool,
}

/// The TTS capability the dispatcher consumes
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn render(&self, text: &str) -> Result<RenderedSpeech>;
}

/// Raw synthesis backend; wrapped by [`CachedTts`] to get the
/// render-with-cache-hit contract
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Demo synthesizer: deterministic placeholder waveform derived from the
/// text. Stands in for a real engine in demo mode and tests.
pub struct ToneSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let data: Vec<u8> = text.bytes().map(|b| b.wrapping_mul(3)).collect();
        Ok(AudioClip {
            text: text.to_string(),
            data: Arc::new(data),
        })
    }
}

/// In-memory render cache keyed by message text. Alert messages repeat
/// heavily, so most renders after warmup are hits.
pub struct CachedTts {
    inner: Box<dyn SpeechSynthesizer>,
    cache: Mutex<HashMap<String, AudioClip>>,
    capacity: usize,
}

impl CachedTts {
    pub fn new(inner: Box<dyn SpeechSynthesizer>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl TextToSpeech for CachedTts {
    async fn render(&self, text: &str) -> Result<RenderedSpeech> {
        if let Some(clip) = self.cache.lock().get(text).cloned() {
            return Ok(RenderedSpeech {
                clip,
                cache_hit: true,
            });
        }

        let clip = self.inner.synthesize(text).await?;

        {
            let mut cache = self.cache.lock();
            if cache.len() >= self.capacity {
                debug!("TTS cache full ({} entries), clearing", cache.len());
                cache.clear();
            }
            cache.insert(text.to_string(), clip.clone());
        }

        Ok(RenderedSpeech {
            clip,
            cache_hit: false,
        })
    }
}

/// An audio output destination
#[async_trait]
pub trait AudioSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, clip: &AudioClip) -> Result<()>;
}

/// Sink that speaks through the log. The default when no hardware
/// backend is wired in; real speaker transports implement [`AudioSink`]
/// and are handed to the engine instead.
pub struct ConsoleSink {
    name: String,
}

impl ConsoleSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AudioSink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, clip: &AudioClip) -> Result<()> {
        info!("[{}] \u{1f50a} {}", self.name, clip.text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_render_is_cache_hit() {
        let tts = CachedTts::new(Box::new(ToneSynthesizer), 16);

        let first = tts.render("intruder at front door").await.unwrap();
        assert!(!first.cache_hit);

        let second = tts.render("intruder at front door").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.clip.data, second.clip.data);
    }

    #[tokio::test]
    async fn test_different_text_misses_cache() {
        let tts = CachedTts::new(Box::new(ToneSynthesizer), 16);
        tts.render("front door").await.unwrap();
        let other = tts.render("back gate").await.unwrap();
        assert!(!other.cache_hit);
    }

    #[tokio::test]
    async fn test_console_sink_accepts_clip() {
        let sink = ConsoleSink::new("porch");
        let clip = AudioClip {
            text: "test".to_string(),
            data: Arc::new(vec![1, 2, 3]),
        };
        assert!(sink.send(&clip).await.is_ok());
        assert_eq!(sink.name(), "porch");
    }
}
