//! Playback session - owns one adapter for one item's playback
//!
//! Exposes the uniform control surface to the application, relays backend
//! events to subscribers, and routes error events through classification
//! and recovery. Recoverable errors are absorbed here and never reach the
//! caller unless escalation is exhausted; non-recoverable errors tear down
//! the adapter and surface exactly one `error` event.

use crate::backend::{EventSink, PlaybackBackend};
use crate::error::{ErrorKind, Result};
use crate::recovery::{classify, ErrorDisposition, RecoveryAction, RecoveryController};
use crate::types::{
    AudioTrack, LoadOptions, PlaySessionState, PlayerConfig, PlayerEvent, SessionId, SubtitleTrack,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

struct SessionShared {
    backend: Arc<dyn PlaybackBackend>,
    state: RwLock<PlaySessionState>,
    sink: EventSink,
    recovery: Mutex<RecoveryController>,
    destroyed: AtomicBool,
}

impl SessionShared {
    /// Tear down the backend and surface a single fatal error event
    async fn fail(&self, kind: ErrorKind, status: Option<u16>, detail: String) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.write().await.last_error = Some(kind);
        self.backend.destroy().await;
        self.sink.emit(PlayerEvent::Error {
            kind,
            status,
            detail,
        });
    }

    async fn handle_error(&self, kind: ErrorKind, status: Option<u16>, detail: String) {
        match classify(kind, status) {
            ErrorDisposition::Fatal => {
                warn!(kind = %kind, status, "Fatal playback error");
                self.fail(kind, status, detail).await;
            }
            ErrorDisposition::BackendRetry => {
                // The backend's internal reload path is already on it
                debug!(kind = %kind, status, "Recoverable transport error, left to backend");
            }
            ErrorDisposition::Escalate => {
                let action = self.recovery.lock().await.next_action();
                let result = match action {
                    RecoveryAction::RecoverMedia => {
                        info!("Attempting media error recovery");
                        self.backend.recover_media_error().await
                    }
                    RecoveryAction::SwapAudioCodec => {
                        info!("Attempting audio codec swap recovery");
                        self.backend.swap_audio_codec().await
                    }
                    RecoveryAction::Fail => {
                        warn!("Recovery escalation exhausted");
                        self.fail(kind, status, detail).await;
                        return;
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "Recovery attempt failed");
                    self.fail(e.kind(), e.status(), e.to_string()).await;
                }
            }
        }
    }

    async fn apply(&self, event: &PlayerEvent) {
        let mut state = self.state.write().await;
        match event {
            PlayerEvent::TimeUpdate(t) => state.current_time = *t,
            PlayerEvent::DurationChange(d) => state.duration = Some(*d),
            PlayerEvent::Playing => state.paused = false,
            PlayerEvent::Pause => state.paused = true,
            PlayerEvent::Buffering(buffering) => state.buffering = *buffering,
            PlayerEvent::Seeked(t) => state.current_time = *t,
            PlayerEvent::AudioTrackChange(id) => state.active_audio_track = Some(*id),
            PlayerEvent::SubtitleTrackChange(id) => state.active_subtitle_track = *id,
            PlayerEvent::Ended => state.paused = true,
            _ => {}
        }
    }
}

/// One item's playback, bound to exactly one adapter instance
pub struct PlaybackSession {
    id: SessionId,
    shared: Arc<SessionShared>,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    pub fn new(backend: Arc<dyn PlaybackBackend>, config: &PlayerConfig) -> Self {
        let shared = Arc::new(SessionShared {
            backend,
            state: RwLock::new(PlaySessionState::default()),
            sink: EventSink::new(),
            recovery: Mutex::new(RecoveryController::new(Duration::from_millis(
                config.recovery_cooldown_ms,
            ))),
            destroyed: AtomicBool::new(false),
        });

        let relay = {
            let shared = Arc::clone(&shared);
            let mut events = shared.backend.subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(PlayerEvent::Error {
                            kind,
                            status,
                            detail,
                        }) => {
                            if shared.destroyed.load(Ordering::SeqCst) {
                                continue;
                            }
                            shared.handle_error(kind, status, detail).await;
                        }
                        Ok(event) => {
                            if shared.destroyed.load(Ordering::SeqCst) {
                                continue;
                            }
                            shared.apply(&event).await;
                            shared.sink.emit(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Session event relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let session = Self {
            id: SessionId::new(),
            shared,
            relay: Mutex::new(Some(relay)),
        };
        info!(session_id = %session.id, backend = session.shared.backend.name(), "Session created");
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Name of the backend driving this session
    pub fn backend_name(&self) -> &'static str {
        self.shared.backend.name()
    }

    /// Subscribe to the session's uniform event stream
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.sink.subscribe()
    }

    /// Snapshot of the current session state
    pub async fn state(&self) -> PlaySessionState {
        self.shared.state.read().await.clone()
    }

    /// Load a media item. Cooldown state from a previous item must never
    /// suppress recovery on a new one, so the recovery record resets here.
    #[instrument(skip(self, options), fields(session_id = %self.id, url = %url))]
    pub async fn load(&self, url: &Url, options: LoadOptions) -> Result<()> {
        self.shared.recovery.lock().await.reset();
        {
            let mut state = self.shared.state.write().await;
            let volume = state.volume;
            *state = PlaySessionState {
                volume,
                active_audio_track: options.audio_track_id,
                active_subtitle_track: options.subtitle_track_id,
                ..PlaySessionState::default()
            };
        }
        if let Err(e) = self.shared.backend.load(url, options).await {
            self.shared.state.write().await.last_error = Some(e.kind());
            return Err(e);
        }
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.shared.backend.play().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.shared.backend.pause().await
    }

    pub async fn seek(&self, position: f64) -> Result<()> {
        self.shared.backend.seek(position).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.shared.backend.set_volume(volume).await?;
        self.shared.state.write().await.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    pub async fn current_time(&self) -> f64 {
        self.shared.backend.current_time().await
    }

    pub async fn duration(&self) -> Option<f64> {
        self.shared.backend.duration().await
    }

    pub async fn is_paused(&self) -> bool {
        self.shared.backend.is_paused().await
    }

    pub async fn select_audio_track(&self, id: u32) -> bool {
        self.shared.backend.select_audio_track(id).await
    }

    pub async fn select_subtitle_track(&self, id: Option<u32>) -> bool {
        self.shared.backend.select_subtitle_track(id).await
    }

    pub async fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.shared.backend.audio_tracks().await
    }

    pub async fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        self.shared.backend.subtitle_tracks().await
    }

    /// Release the adapter and stop event relay. Idempotent; a relay that
    /// already tore the session down on a fatal error makes this a no-op
    /// apart from task cleanup.
    pub async fn destroy(&self) {
        if !self.shared.destroyed.swap(true, Ordering::SeqCst) {
            self.shared.backend.destroy().await;
        }
        if let Some(handle) = self.relay.lock().await.take() {
            handle.abort();
        }
        debug!(session_id = %self.id, "Session destroyed");
    }
}
