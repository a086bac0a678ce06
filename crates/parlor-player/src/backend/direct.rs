//! Direct-element backend
//!
//! Assigns non-segmented sources straight to the playback surface and waits
//! for a decodability signal. Segmented (HLS-style) sources go through one
//! of three paths, in order of preference:
//! 1. native in-runtime segmented support, where the element advertises it
//!    (embedded TV runtimes tend to handle HLS more reliably natively)
//! 2. the embedded software segmented-stream player
//! 3. direct assignment as a last resort
//!
//! Some platforms stall silently on an undecodable stream without raising
//! an error, so every load path is bounded by an overall timeout.

use crate::backend::{
    dedupe_audio_tracks, dedupe_subtitle_tracks, spawn_element_drain, ElementShared, EventSink,
    LoadPhase, PlaybackBackend,
};
use crate::error::{Error, ErrorKind, Result};
use crate::platform::{MediaElement, VideoSurface};
use crate::types::{
    AudioTrack, CredentialMode, LoadOptions, PlayerConfig, PlayerEvent, SubtitleTrack,
};
use async_trait::async_trait;
use m3u8_rs::{AlternativeMediaType, Playlist};
use reqwest::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// How the current source reaches the element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Single progressive file assigned directly
    Progressive,
    /// Runtime plays the segmented source natively
    NativeSegmented,
    /// Embedded software segmented-stream player feeds the element
    HelperSegmented,
}

/// Heuristic for segmented (playlist-described) sources
pub fn is_segmented(url: &Url, mime_type: Option<&str>) -> bool {
    if let Some(mime) = mime_type {
        let lower = mime.to_lowercase();
        if lower.contains("mpegurl") || lower.contains("m3u8") {
            return true;
        }
    }
    url.path().to_lowercase().ends_with(".m3u8")
}

struct DirectSession {
    url: Url,
    mode: SourceMode,
    credentials: CredentialMode,
    start_position: f64,
    audio: Vec<AudioTrack>,
    subtitles: Vec<SubtitleTrack>,
}

/// Backend adapter for the direct browser media element
pub struct DirectElementAdapter {
    surface: Arc<VideoSurface>,
    config: PlayerConfig,
    client: Client,
    shared: Arc<ElementShared>,
    session: RwLock<Option<DirectSession>>,
    helper: Mutex<Option<SegmentedStreamPlayer>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl DirectElementAdapter {
    pub fn new(surface: Arc<VideoSurface>, config: PlayerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            surface,
            config,
            client,
            shared: Arc::new(ElementShared::new(EventSink::new())),
            session: RwLock::new(None),
            helper: Mutex::new(None),
            drain: Mutex::new(None),
        }
    }

    async fn ensure_drain(&self) {
        let mut drain = self.drain.lock().await;
        if drain.is_none() {
            *drain = Some(spawn_element_drain(
                self.surface.element(),
                Arc::clone(&self.shared),
            ));
        }
    }

    /// Wait until the element signals readiness or failure, bounded by the
    /// overall load timeout
    async fn await_readiness(&self) -> Result<()> {
        let mut phase_rx = self.shared.phase_tx.subscribe();
        let wait = phase_rx.wait_for(|p| !matches!(p, LoadPhase::Idle));
        let phase = match tokio::time::timeout(
            Duration::from_secs(self.config.load_timeout_secs),
            wait,
        )
        .await
        {
            Err(_) => {
                return Err(Error::LoadTimeout {
                    seconds: self.config.load_timeout_secs,
                })
            }
            Ok(Err(_)) => return Err(Error::Internal("load phase channel closed".into())),
            Ok(Ok(phase)) => *phase,
        };
        match phase {
            LoadPhase::Ready => Ok(()),
            LoadPhase::Failed(ErrorKind::MediaDecode) => {
                Err(Error::MediaDecode("element failed during load".into()))
            }
            LoadPhase::Failed(ErrorKind::MediaNotSupported) => {
                Err(Error::MediaNotSupported("element rejected source".into()))
            }
            LoadPhase::Failed(_) => Err(Error::Network {
                status: None,
                message: "element failed during load".into(),
            }),
            LoadPhase::Idle => unreachable!("wait_for excludes Idle"),
        }
    }

    async fn start_source(&self, session: &DirectSession) -> Result<()> {
        let element = self.surface.element();
        match session.mode {
            SourceMode::Progressive | SourceMode::NativeSegmented => {
                element.set_source(&session.url, session.credentials).await?;
            }
            SourceMode::HelperSegmented => {
                let mut helper = SegmentedStreamPlayer::new(
                    self.client.clone(),
                    element,
                    self.shared.sink.clone(),
                    self.config.clone(),
                    session.credentials,
                );
                helper.start(&session.url).await?;
                *self.helper.lock().await = Some(helper);
            }
        }
        Ok(())
    }

    async fn stop_helper(&self) {
        if let Some(mut helper) = self.helper.lock().await.take() {
            helper.stop().await;
        }
    }
}

#[async_trait]
impl PlaybackBackend for DirectElementAdapter {
    async fn initialize(&self) -> bool {
        // The element is part of every surface; this backend is the broadly
        // compatible path and only ever fails at load time
        true
    }

    #[instrument(skip(self, options), fields(url = %url))]
    async fn load(&self, url: &Url, options: LoadOptions) -> Result<()> {
        // Tear down any prior source bound to this surface
        self.stop_helper().await;
        if self.session.write().await.take().is_some() {
            self.surface.element().clear_source().await;
        }
        self.shared.phase_tx.send_replace(LoadPhase::Idle);

        let credentials = options
            .media_source
            .as_ref()
            .map(|s| s.credential_mode(url))
            .unwrap_or(CredentialMode::Omit);

        let mime = options.mime_type.as_deref();
        let mode = if is_segmented(url, mime) {
            if self
                .surface
                .element()
                .native_segmented_support()
                .is_supported()
            {
                SourceMode::NativeSegmented
            } else {
                SourceMode::HelperSegmented
            }
        } else {
            SourceMode::Progressive
        };

        info!(mode = ?mode, "Direct element load");

        *self.shared.pending_start.write().await = Some(options.start_position);
        self.ensure_drain().await;

        let mut session = DirectSession {
            url: url.clone(),
            mode,
            credentials,
            start_position: options.start_position,
            audio: Vec::new(),
            subtitles: Vec::new(),
        };
        self.start_source(&session).await?;

        if mode == SourceMode::HelperSegmented {
            if let Some(helper) = self.helper.lock().await.as_ref() {
                session.audio = helper.audio_tracks(&options);
                session.subtitles = helper.subtitle_tracks(&options);
            }
        }
        *self.session.write().await = Some(session);
        self.shared.sink.emit(PlayerEvent::Loaded);

        self.await_readiness().await
    }

    async fn play(&self) -> Result<()> {
        self.surface.element().play().await
    }

    async fn pause(&self) -> Result<()> {
        self.surface.element().pause().await
    }

    async fn seek(&self, position: f64) -> Result<()> {
        self.surface.element().set_current_time(position).await
    }

    async fn set_volume(&self, volume: f64) -> Result<()> {
        self.surface.element().set_volume(volume.clamp(0.0, 1.0)).await
    }

    async fn current_time(&self) -> f64 {
        self.surface.element().current_time().await
    }

    async fn duration(&self) -> Option<f64> {
        self.surface.element().duration().await
    }

    async fn volume(&self) -> f64 {
        self.surface.element().volume().await
    }

    async fn is_paused(&self) -> bool {
        self.surface.element().paused().await
    }

    async fn select_audio_track(&self, id: u32) -> bool {
        let mut session = self.session.write().await;
        let Some(session) = session.as_mut() else {
            return false;
        };
        if !session.audio.iter().any(|t| t.id == id) {
            return false;
        }
        if let Err(e) = self.surface.element().select_audio_track(id).await {
            warn!(error = %e, track = id, "Audio track switch failed");
            return false;
        }
        for track in session.audio.iter_mut() {
            track.active = track.id == id;
        }
        self.shared.sink.emit(PlayerEvent::AudioTrackChange(id));
        true
    }

    async fn select_subtitle_track(&self, id: Option<u32>) -> bool {
        let mut session = self.session.write().await;
        let Some(session) = session.as_mut() else {
            return false;
        };
        if let Some(id) = id {
            if !session.subtitles.iter().any(|t| t.id == id) {
                return false;
            }
        }
        if let Err(e) = self.surface.element().select_subtitle_track(id).await {
            warn!(error = %e, track = ?id, "Subtitle track switch failed");
            return false;
        }
        for track in session.subtitles.iter_mut() {
            track.active = Some(track.id) == id;
        }
        self.shared.sink.emit(PlayerEvent::SubtitleTrackChange(id));
        true
    }

    async fn audio_tracks(&self) -> Vec<AudioTrack> {
        match self.session.read().await.as_ref() {
            Some(s) => dedupe_audio_tracks(s.audio.clone()),
            None => Vec::new(),
        }
    }

    async fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        match self.session.read().await.as_ref() {
            Some(s) => dedupe_subtitle_tracks(s.subtitles.clone()),
            None => Vec::new(),
        }
    }

    async fn recover_media_error(&self) -> Result<()> {
        // Restart the current source at the current position; for the
        // helper path that rebuilds the segment stream from scratch
        let position = self.current_time().await;
        let Some(session) = self.session.read().await.as_ref().map(|s| DirectSession {
            url: s.url.clone(),
            mode: s.mode,
            credentials: s.credentials,
            start_position: position,
            audio: s.audio.clone(),
            subtitles: s.subtitles.clone(),
        }) else {
            return Err(Error::NoMedia);
        };
        debug!(mode = ?session.mode, "Direct element: restarting source after decode error");

        self.stop_helper().await;
        self.surface.element().clear_source().await;
        *self.shared.pending_start.write().await = Some(position);
        self.start_source(&session).await
    }

    async fn swap_audio_codec(&self) -> Result<()> {
        // The element offers no codec negotiation; moving the active audio
        // track is the closest remediation before giving up
        let next = {
            let session = self.session.read().await;
            let Some(session) = session.as_ref() else {
                return Err(Error::NoMedia);
            };
            let active = session.audio.iter().position(|t| t.active).unwrap_or(0);
            session
                .audio
                .get((active + 1) % session.audio.len().max(1))
                .map(|t| t.id)
        };
        if let Some(id) = next {
            self.select_audio_track(id).await;
        }
        self.recover_media_error().await
    }

    async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_helper().await;
        *self.session.write().await = None;
        self.surface.element().clear_source().await;
        if let Some(handle) = self.drain.lock().await.take() {
            handle.abort();
        }
        debug!("Direct element adapter destroyed");
    }

    fn name(&self) -> &'static str {
        "direct-element"
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.sink.subscribe()
    }
}

/// Embedded software segmented-stream player.
///
/// Fetches the playlist, picks a variant, and feeds segment data into the
/// element's stream sink. Transient fetch failures are retried internally
/// (the self-heal path); client errors are fatal and surfaced as events.
pub(crate) struct SegmentedStreamPlayer {
    client: Client,
    element: Arc<dyn MediaElement>,
    sink: EventSink,
    config: PlayerConfig,
    credentials: CredentialMode,
    master: Option<m3u8_rs::MasterPlaylist>,
    task: Option<JoinHandle<()>>,
}

impl SegmentedStreamPlayer {
    fn new(
        client: Client,
        element: Arc<dyn MediaElement>,
        sink: EventSink,
        config: PlayerConfig,
        credentials: CredentialMode,
    ) -> Self {
        Self {
            client,
            element,
            sink,
            config,
            credentials,
            master: None,
            task: None,
        }
    }

    /// Resolve the playlist and start the segment feed
    async fn start(&mut self, url: &Url) -> Result<()> {
        let content = fetch_bytes(&self.client, url, &self.config).await?;

        let media_url = match m3u8_rs::parse_playlist_res(&content) {
            Ok(Playlist::MasterPlaylist(master)) => {
                let variant = master
                    .variants
                    .iter()
                    .min_by_key(|v| v.bandwidth)
                    .ok_or(Error::NoSuitableVariant)?;
                let media_url = url
                    .join(&variant.uri)
                    .map_err(|e| Error::ManifestParse(format!("invalid variant URI: {}", e)))?;
                self.master = Some(master);
                media_url
            }
            Ok(Playlist::MediaPlaylist(_)) => url.clone(),
            Err(e) => return Err(Error::ManifestParse(format!("{:?}", e))),
        };

        let content = fetch_bytes(&self.client, &media_url, &self.config).await?;
        let media = m3u8_rs::parse_media_playlist_res(&content)
            .map_err(|e| Error::ManifestParse(format!("{:?}", e)))?;

        let segments: Vec<(Url, f64)> = media
            .segments
            .iter()
            .map(|s| media_url.join(&s.uri).map(|u| (u, f64::from(s.duration))))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::ManifestParse(format!("invalid segment URI: {}", e)))?;

        info!(segments = segments.len(), "Segmented stream resolved");
        self.element.open_stream("video/mp2t").await?;

        let client = self.client.clone();
        let element = Arc::clone(&self.element);
        let sink = self.sink.clone();
        let config = self.config.clone();
        self.task = Some(tokio::spawn(async move {
            let mut pacer = FeedPacer::new(&config);
            let mut buffered_end = 0.0;
            for (url, duration) in segments {
                while !pacer.should_fetch(buffered_end - element.current_time().await) {
                    tokio::time::sleep(FEED_POLL_INTERVAL).await;
                }
                match fetch_bytes(&client, &url, &config).await {
                    Ok(data) => {
                        if element.append_segment(data.into()).await.is_err() {
                            // Sink torn down mid-stream; stop quietly
                            return;
                        }
                        buffered_end += duration;
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Segment feed failed");
                        sink.emit(feed_exhausted_error(&e));
                        return;
                    }
                }
            }
            let _ = element.end_stream().await;
        }));

        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let _ = self.element.end_stream().await;
    }

    fn audio_tracks(&self, options: &LoadOptions) -> Vec<AudioTrack> {
        let Some(master) = &self.master else {
            return Vec::new();
        };
        let mut tracks = Vec::new();
        for alt in &master.alternatives {
            if alt.media_type == AlternativeMediaType::Audio {
                let id = tracks.len() as u32;
                tracks.push(AudioTrack {
                    id,
                    language: alt.language.clone().unwrap_or_else(|| "und".into()),
                    label: alt.name.clone(),
                    codec: None,
                    channels: alt.channels.as_ref().and_then(|c| c.parse().ok()),
                    active: options.audio_track_id.map(|t| t == id).unwrap_or(alt.default),
                });
            }
        }
        tracks
    }

    fn subtitle_tracks(&self, options: &LoadOptions) -> Vec<SubtitleTrack> {
        let Some(master) = &self.master else {
            return Vec::new();
        };
        let mut tracks = Vec::new();
        for alt in &master.alternatives {
            if alt.media_type == AlternativeMediaType::Subtitles {
                let id = tracks.len() as u32;
                tracks.push(SubtitleTrack {
                    id,
                    language: alt.language.clone().unwrap_or_else(|| "und".into()),
                    label: alt.name.clone(),
                    forced: alt.forced,
                    active: options.subtitle_track_id == Some(id),
                });
            }
        }
        tracks
    }
}

const FEED_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pacing for the segment feed: fill the element ahead of playback to the
/// buffering goal, then let the lead drain to the rebuffering goal before
/// topping up again
struct FeedPacer {
    high: f64,
    low: f64,
    filling: bool,
}

impl FeedPacer {
    fn new(config: &PlayerConfig) -> Self {
        Self {
            high: config.buffering_goal,
            low: config.rebuffering_goal,
            filling: true,
        }
    }

    fn should_fetch(&mut self, lead_seconds: f64) -> bool {
        if self.filling {
            if lead_seconds >= self.high {
                self.filling = false;
            }
        } else if lead_seconds <= self.low {
            self.filling = true;
        }
        self.filling
    }
}

/// The feed's bounded retries are the backend's internal recovery path;
/// once they are spent the failure surfaces as fatal so the session tears
/// down instead of waiting on a dead feed
fn feed_exhausted_error(e: &Error) -> PlayerEvent {
    PlayerEvent::Error {
        kind: ErrorKind::FatalStreaming,
        status: e.status(),
        detail: e.to_string(),
    }
}

/// Fetch with bounded retries and backoff. 4xx responses return
/// immediately; retries cannot help a rejected request.
async fn fetch_bytes(client: &Client, url: &Url, config: &PlayerConfig) -> Result<Vec<u8>> {
    let mut delay = Duration::from_millis(config.retry_delay_ms);
    let mut last_err = None;

    for attempt in 0..config.retry_attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        match client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_client_error() {
                    return Err(Error::Network {
                        status: Some(status.as_u16()),
                        message: format!("request rejected: {}", status),
                    });
                }
                if status.is_server_error() {
                    last_err = Some(Error::Network {
                        status: Some(status.as_u16()),
                        message: format!("request failed: {}", status),
                    });
                    continue;
                }
                return Ok(response
                    .bytes()
                    .await
                    .map_err(|e| Error::Network {
                        status: None,
                        message: e.to_string(),
                    })?
                    .to_vec());
            }
            Err(e) => {
                last_err = Some(Error::Network {
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Network {
        status: None,
        message: "retries exhausted".into(),
    }))
}
