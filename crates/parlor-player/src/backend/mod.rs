//! Playback backends
//!
//! Three structurally different backends sit behind one trait:
//! - [`AdaptiveManifestAdapter`] - manifest-driven adaptive streaming engine
//! - [`NativePipelineAdapter`] - platform-native out-of-process media pipeline
//! - [`DirectElementAdapter`] - direct media element, with an embedded
//!   segmented-stream helper for HLS-style sources
//!
//! The factory selects among them at runtime; the session drives whichever
//! one initialized through this uniform surface.

mod adaptive;
mod direct;
mod native;

pub use adaptive::AdaptiveManifestAdapter;
pub use direct::DirectElementAdapter;
pub use native::NativePipelineAdapter;

pub(crate) use direct::is_segmented;

use crate::error::{ErrorKind, Result};
use crate::platform::{ElementEvent, MediaElement, MediaErrorCode};
use crate::types::{AudioTrack, LoadOptions, PlayerEvent, SubtitleTrack};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

/// Common interface implemented by every playback backend.
///
/// Transport getters return last-known cached state for backends where the
/// underlying call is inherently asynchronous. Track selection never errors:
/// with no loaded session it is a no-op returning false.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Detect backend-specific platform availability. Returning false is
    /// not an error; the factory falls through to the next candidate.
    async fn initialize(&self) -> bool;

    /// Load a media item, tearing down any prior backend session first
    async fn load(&self, url: &Url, options: LoadOptions) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn seek(&self, position: f64) -> Result<()>;
    async fn set_volume(&self, volume: f64) -> Result<()>;

    async fn current_time(&self) -> f64;
    async fn duration(&self) -> Option<f64>;
    async fn volume(&self) -> f64;
    async fn is_paused(&self) -> bool;

    async fn select_audio_track(&self, id: u32) -> bool;
    /// `None` disables subtitles
    async fn select_subtitle_track(&self, id: Option<u32>) -> bool;
    async fn audio_tracks(&self) -> Vec<AudioTrack>;
    async fn subtitle_tracks(&self) -> Vec<SubtitleTrack>;

    /// Generic recovery action for a decode error
    async fn recover_media_error(&self) -> Result<()> {
        Ok(())
    }

    /// Swap the audio codec preference and recover again
    async fn swap_audio_codec(&self) -> Result<()> {
        Ok(())
    }

    /// Release all backend resources and stop event delivery. Idempotent.
    async fn destroy(&self);

    /// Stable identifier for diagnostics
    fn name(&self) -> &'static str;

    /// Subscribe to the uniform event stream
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// Broadcast sender for the uniform event contract.
///
/// Emission is fire-and-forget; a session with no subscribers drops events
/// rather than erroring.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Deduplicate audio tracks by language, keeping the active variant where
/// a backend exposes multiple quality variants per language
pub fn dedupe_audio_tracks(tracks: Vec<AudioTrack>) -> Vec<AudioTrack> {
    let mut out: Vec<AudioTrack> = Vec::new();
    for track in tracks {
        match out.iter_mut().find(|t| t.language == track.language) {
            Some(existing) => {
                if track.active && !existing.active {
                    *existing = track;
                }
            }
            None => out.push(track),
        }
    }
    out
}

/// Deduplicate subtitle tracks by language; forced tracks are kept separate
/// from regular ones since they serve a different purpose
pub fn dedupe_subtitle_tracks(tracks: Vec<SubtitleTrack>) -> Vec<SubtitleTrack> {
    let mut out: Vec<SubtitleTrack> = Vec::new();
    for track in tracks {
        match out
            .iter_mut()
            .find(|t| t.language == track.language && t.forced == track.forced)
        {
            Some(existing) => {
                if track.active && !existing.active {
                    *existing = track;
                }
            }
            None => out.push(track),
        }
    }
    out
}

/// Load phase observed by element-backed adapters while awaiting readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadPhase {
    Idle,
    Ready,
    Failed(ErrorKind),
}

/// State shared between an element-backed adapter and its drain task
pub(crate) struct ElementShared {
    pub sink: EventSink,
    /// Start position to apply once metadata is available; setting it
    /// earlier is backend-undefined behavior
    pub pending_start: RwLock<Option<f64>>,
    /// Latest load phase; written with `send_replace` so a signal raised
    /// before anyone waits on the channel is kept, not dropped
    pub phase_tx: watch::Sender<LoadPhase>,
    pub destroyed: AtomicBool,
}

impl ElementShared {
    pub fn new(sink: EventSink) -> Self {
        let (phase_tx, _) = watch::channel(LoadPhase::Idle);
        Self {
            sink,
            pending_start: RwLock::new(None),
            phase_tx,
            destroyed: AtomicBool::new(false),
        }
    }
}

fn element_error(code: MediaErrorCode) -> (ErrorKind, String) {
    match code {
        MediaErrorCode::Decode => (ErrorKind::MediaDecode, "element decode error".into()),
        MediaErrorCode::Network => (ErrorKind::Network, "element network error".into()),
        MediaErrorCode::SrcNotSupported => {
            (ErrorKind::MediaNotSupported, "source not supported".into())
        }
        MediaErrorCode::Aborted => (ErrorKind::FatalStreaming, "playback aborted".into()),
    }
}

/// Drain a media element's event stream into the uniform contract.
///
/// Events arriving after destruction are discarded; tear-down races are
/// inherent to the element's asynchronous delivery.
pub(crate) fn spawn_element_drain(
    element: Arc<dyn MediaElement>,
    shared: Arc<ElementShared>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut events) = element.take_events().await else {
            debug!("Element event stream already taken; drain not started");
            return;
        };

        let mut buffering = false;
        while let Some(event) = events.recv().await {
            if shared.destroyed.load(Ordering::SeqCst) {
                continue;
            }
            match event {
                ElementEvent::LoadedMetadata { duration } => {
                    if let Some(d) = duration {
                        shared.sink.emit(PlayerEvent::DurationChange(d));
                    }
                    let pending = shared.pending_start.write().await.take();
                    if let Some(position) = pending {
                        if position > 0.0 {
                            let _ = element.set_current_time(position).await;
                        }
                    }
                }
                ElementEvent::CanPlay => {
                    shared.phase_tx.send_replace(LoadPhase::Ready);
                    shared.sink.emit(PlayerEvent::CanPlay);
                }
                ElementEvent::Playing => {
                    if buffering {
                        buffering = false;
                        shared.sink.emit(PlayerEvent::Buffering(false));
                    }
                    shared.sink.emit(PlayerEvent::Playing);
                }
                ElementEvent::Pause => shared.sink.emit(PlayerEvent::Pause),
                ElementEvent::Waiting => {
                    buffering = true;
                    shared.sink.emit(PlayerEvent::Buffering(true));
                }
                ElementEvent::TimeUpdate(t) => shared.sink.emit(PlayerEvent::TimeUpdate(t)),
                ElementEvent::Seeked(t) => shared.sink.emit(PlayerEvent::Seeked(t)),
                ElementEvent::Ended => shared.sink.emit(PlayerEvent::Ended),
                ElementEvent::Error(code) => {
                    let (kind, detail) = element_error(code);
                    shared.phase_tx.send_replace(LoadPhase::Failed(kind));
                    shared.sink.emit(PlayerEvent::Error {
                        kind,
                        status: None,
                        detail,
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(id: u32, language: &str, active: bool) -> AudioTrack {
        AudioTrack {
            id,
            language: language.into(),
            label: language.to_uppercase(),
            codec: None,
            channels: None,
            active,
        }
    }

    #[test]
    fn test_dedupe_audio_by_language() {
        let tracks = vec![
            audio(0, "en", false),
            audio(1, "en", false),
            audio(2, "fr", false),
        ];
        let deduped = dedupe_audio_tracks(tracks);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, 0);
        assert_eq!(deduped[1].language, "fr");
    }

    #[test]
    fn test_dedupe_prefers_active_variant() {
        let tracks = vec![audio(0, "en", false), audio(1, "en", true)];
        let deduped = dedupe_audio_tracks(tracks);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, 1);
        assert!(deduped[0].active);
    }

    #[test]
    fn test_forced_subtitles_kept_separate() {
        let tracks = vec![
            SubtitleTrack {
                id: 0,
                language: "en".into(),
                label: "English".into(),
                forced: false,
                active: false,
            },
            SubtitleTrack {
                id: 1,
                language: "en".into(),
                label: "English (Forced)".into(),
                forced: true,
                active: false,
            },
        ];
        assert_eq!(dedupe_subtitle_tracks(tracks).len(), 2);
    }
}
