//! Native-pipeline backend
//!
//! Delegates the entire decode/render pipeline to the platform's
//! out-of-process media service over an asynchronous request/response plus
//! subscription channel. The service speaks milliseconds; the adapter
//! translates to caller-facing seconds and caches last-known state so the
//! synchronous-style getters never block on a bridge round trip.
//!
//! Playback start is requested immediately after a successful load
//! acknowledgment: some platform implementations never deliver the ready
//! event to the hosting page.

use crate::backend::{dedupe_audio_tracks, dedupe_subtitle_tracks, EventSink, PlaybackBackend};
use crate::error::{Error, ErrorKind, Result};
use crate::platform::{BridgeEvent, BridgeMethod, MediaBridge, VideoSurface};
use crate::types::{AudioTrack, LoadOptions, PlayerEvent, SubtitleTrack};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use url::Url;

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0) as u64
}

/// Service error codes observed across platform revisions
fn bridge_error_kind(code: i32) -> ErrorKind {
    match code {
        1 => ErrorKind::Network,
        2 => ErrorKind::MediaDecode,
        3 => ErrorKind::MediaNotSupported,
        _ => ErrorKind::FatalStreaming,
    }
}

#[derive(Debug, Clone)]
struct CachedState {
    current_time: f64,
    duration: Option<f64>,
    volume: f64,
    paused: bool,
}

impl Default for CachedState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: None,
            volume: 1.0,
            paused: true,
        }
    }
}

#[derive(Default)]
struct TrackState {
    audio: Vec<AudioTrack>,
    subtitles: Vec<SubtitleTrack>,
}

/// State shared with the subscription drain task
struct NativeShared {
    sink: EventSink,
    state: RwLock<CachedState>,
    tracks: RwLock<TrackState>,
    destroyed: AtomicBool,
}

/// Backend adapter for the platform-native media pipeline
pub struct NativePipelineAdapter {
    surface: Arc<VideoSurface>,
    shared: Arc<NativeShared>,
    /// Last successful load; recovery reloads from here
    loaded: RwLock<Option<(Url, LoadOptions)>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl NativePipelineAdapter {
    pub fn new(surface: Arc<VideoSurface>) -> Self {
        Self {
            surface,
            shared: Arc::new(NativeShared {
                sink: EventSink::new(),
                state: RwLock::new(CachedState::default()),
                tracks: RwLock::new(TrackState::default()),
                destroyed: AtomicBool::new(false),
            }),
            loaded: RwLock::new(None),
            drain: Mutex::new(None),
        }
    }

    fn bridge(&self) -> Result<Arc<dyn MediaBridge>> {
        self.surface
            .bridge()
            .ok_or_else(|| Error::Internal("native pipeline bridge not present".into()))
    }

    async fn call(&self, method: BridgeMethod, params: serde_json::Value) -> Result<serde_json::Value> {
        self.bridge()?
            .call(method, params)
            .await
            .map_err(|e| Error::BridgeCall {
                method: method.to_string(),
                message: e.to_string(),
            })
    }

    /// Start the subscription drain once per adapter; the service keeps one
    /// event channel alive across loads
    async fn ensure_drain(&self) -> Result<()> {
        let mut drain = self.drain.lock().await;
        if drain.is_some() {
            return Ok(());
        }
        let Some(mut events) = self.bridge()?.take_events().await else {
            return Err(Error::Internal("bridge subscription already taken".into()));
        };

        let shared = Arc::clone(&self.shared);
        *drain = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // Events for a torn-down session are discarded, not raised
                if shared.destroyed.load(Ordering::SeqCst) {
                    continue;
                }
                match event {
                    BridgeEvent::CurrentTime { position_ms } => {
                        let secs = ms_to_secs(position_ms);
                        shared.state.write().await.current_time = secs;
                        shared.sink.emit(PlayerEvent::TimeUpdate(secs));
                    }
                    BridgeEvent::BufferingStart => shared.sink.emit(PlayerEvent::Buffering(true)),
                    BridgeEvent::BufferingEnd => shared.sink.emit(PlayerEvent::Buffering(false)),
                    BridgeEvent::SourceInfo {
                        duration_ms,
                        audio_tracks,
                        subtitle_tracks,
                    } => {
                        let duration = ms_to_secs(duration_ms);
                        shared.state.write().await.duration = Some(duration);
                        let mut tracks = shared.tracks.write().await;
                        tracks.audio = audio_tracks;
                        tracks.subtitles = subtitle_tracks;
                        drop(tracks);
                        shared.sink.emit(PlayerEvent::DurationChange(duration));
                    }
                    BridgeEvent::VideoInfo { width, height } => {
                        shared.sink.emit(PlayerEvent::VideoInfo { width, height });
                    }
                    BridgeEvent::AudioInfo { codec, channels } => {
                        shared.sink.emit(PlayerEvent::AudioInfo { codec, channels });
                    }
                    BridgeEvent::LoadCompleted => shared.sink.emit(PlayerEvent::CanPlay),
                    BridgeEvent::Playing => {
                        shared.state.write().await.paused = false;
                        shared.sink.emit(PlayerEvent::Playing);
                    }
                    BridgeEvent::Paused => {
                        shared.state.write().await.paused = true;
                        shared.sink.emit(PlayerEvent::Pause);
                    }
                    BridgeEvent::SeekDone { position_ms } => {
                        let secs = ms_to_secs(position_ms);
                        shared.state.write().await.current_time = secs;
                        shared.sink.emit(PlayerEvent::Seeked(secs));
                    }
                    BridgeEvent::EndOfStream => shared.sink.emit(PlayerEvent::Ended),
                    BridgeEvent::Error { code, message } => {
                        shared.sink.emit(PlayerEvent::Error {
                            kind: bridge_error_kind(code),
                            status: None,
                            detail: message,
                        });
                    }
                }
            }
        }));
        Ok(())
    }

    async fn do_load(&self, url: &Url, options: &LoadOptions) -> Result<()> {
        // A prior pipeline session must be unloaded before a new source is
        // accepted; load-over-load is service-undefined behavior
        if self.loaded.read().await.is_some() {
            if let Err(e) = self.call(BridgeMethod::Unload, json!({})).await {
                warn!(error = %e, "Unload of prior native session failed");
            }
            *self.loaded.write().await = None;
        }

        *self.shared.state.write().await = CachedState::default();
        *self.shared.tracks.write().await = TrackState::default();

        self.ensure_drain().await?;

        let mut params = json!({
            "url": url.as_str(),
            "startTimeMs": secs_to_ms(options.start_position),
        });
        if let Some(mime) = &options.mime_type {
            params["mimeType"] = json!(mime);
        }
        if let Some(id) = options.audio_track_id {
            params["audioTrackId"] = json!(id);
        }
        if let Some(id) = options.subtitle_track_id {
            params["subtitleTrackId"] = json!(id);
        }

        self.call(BridgeMethod::Load, params).await?;
        *self.loaded.write().await = Some((url.clone(), options.clone()));
        self.shared.sink.emit(PlayerEvent::Loaded);

        // Start right away; waiting on the subscription's ready event is
        // unreliable on some platform revisions
        self.call(BridgeMethod::Play, json!({})).await?;
        self.shared.state.write().await.paused = false;

        Ok(())
    }

    /// Unload and reload the current item at the current position
    async fn reload_current(&self, audio_track_override: Option<u32>) -> Result<()> {
        let Some((url, mut options)) = self.loaded.read().await.clone() else {
            return Err(Error::NoMedia);
        };
        options.start_position = self.shared.state.read().await.current_time;
        if let Some(id) = audio_track_override {
            options.audio_track_id = Some(id);
        }
        self.do_load(&url, &options).await
    }
}

#[async_trait]
impl PlaybackBackend for NativePipelineAdapter {
    async fn initialize(&self) -> bool {
        let available = self.surface.bridge().is_some();
        debug!(available, "Native pipeline availability");
        available
    }

    #[instrument(skip(self, options), fields(url = %url))]
    async fn load(&self, url: &Url, options: LoadOptions) -> Result<()> {
        self.do_load(url, &options).await
    }

    async fn play(&self) -> Result<()> {
        self.call(BridgeMethod::Play, json!({})).await?;
        self.shared.state.write().await.paused = false;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.call(BridgeMethod::Pause, json!({})).await?;
        self.shared.state.write().await.paused = true;
        Ok(())
    }

    async fn seek(&self, position: f64) -> Result<()> {
        self.call(
            BridgeMethod::Seek,
            json!({ "positionMs": secs_to_ms(position) }),
        )
        .await?;
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<()> {
        let clamped = volume.clamp(0.0, 1.0);
        self.call(BridgeMethod::SetVolume, json!({ "volume": clamped }))
            .await?;
        self.shared.state.write().await.volume = clamped;
        Ok(())
    }

    async fn current_time(&self) -> f64 {
        self.shared.state.read().await.current_time
    }

    async fn duration(&self) -> Option<f64> {
        self.shared.state.read().await.duration
    }

    async fn volume(&self) -> f64 {
        self.shared.state.read().await.volume
    }

    async fn is_paused(&self) -> bool {
        self.shared.state.read().await.paused
    }

    async fn select_audio_track(&self, id: u32) -> bool {
        if self.loaded.read().await.is_none() {
            return false;
        }
        {
            let tracks = self.shared.tracks.read().await;
            if !tracks.audio.iter().any(|t| t.id == id) {
                return false;
            }
        }
        // The service has no in-place track switch; re-issue the load with
        // the new track at the current position
        if let Err(e) = self.reload_current(Some(id)).await {
            warn!(error = %e, track = id, "Audio track switch failed");
            return false;
        }
        let mut tracks = self.shared.tracks.write().await;
        for track in tracks.audio.iter_mut() {
            track.active = track.id == id;
        }
        drop(tracks);
        self.shared.sink.emit(PlayerEvent::AudioTrackChange(id));
        true
    }

    async fn select_subtitle_track(&self, id: Option<u32>) -> bool {
        if self.loaded.read().await.is_none() {
            return false;
        }
        let mut tracks = self.shared.tracks.write().await;
        if let Some(id) = id {
            if !tracks.subtitles.iter().any(|t| t.id == id) {
                return false;
            }
        }
        for track in tracks.subtitles.iter_mut() {
            track.active = Some(track.id) == id;
        }
        drop(tracks);
        if let Some((_, options)) = self.loaded.write().await.as_mut() {
            options.subtitle_track_id = id;
        }
        self.shared.sink.emit(PlayerEvent::SubtitleTrackChange(id));
        true
    }

    async fn audio_tracks(&self) -> Vec<AudioTrack> {
        dedupe_audio_tracks(self.shared.tracks.read().await.audio.clone())
    }

    async fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        dedupe_subtitle_tracks(self.shared.tracks.read().await.subtitles.clone())
    }

    async fn recover_media_error(&self) -> Result<()> {
        debug!("Native pipeline: reloading session after decode error");
        self.reload_current(None).await
    }

    async fn swap_audio_codec(&self) -> Result<()> {
        // Move to the next audio track; a different codec variant often
        // clears a decoder wedge on these pipelines
        let next = {
            let tracks = self.shared.tracks.read().await;
            let active = tracks.audio.iter().position(|t| t.active).unwrap_or(0);
            tracks
                .audio
                .get((active + 1) % tracks.audio.len().max(1))
                .map(|t| t.id)
        };
        debug!(track = ?next, "Native pipeline: swapping audio track after decode error");
        self.reload_current(next).await
    }

    async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.loaded.write().await.take().is_some() {
            if let Ok(bridge) = self.bridge() {
                if let Err(e) = bridge.call(BridgeMethod::Unload, json!({})).await {
                    warn!(error = %e, "Unload during destroy failed");
                }
            }
        }
        if let Some(handle) = self.drain.lock().await.take() {
            handle.abort();
        }
        debug!("Native pipeline adapter destroyed");
    }

    fn name(&self) -> &'static str {
        "native-pipeline"
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.sink.subscribe()
    }
}
