//! Adaptive-manifest backend
//!
//! Drives playback from a multivariant manifest: fetches the master
//! playlist with bounded retries, builds the variant ladder, and picks a
//! rendition through a capability-gated codec preference order. Premium
//! dynamic-range variants are preferred ahead of SDR only when the platform
//! actually reports hardware support; otherwise they are omitted from
//! selection entirely and the backend falls back to baseline codecs.

use crate::backend::{
    dedupe_audio_tracks, dedupe_subtitle_tracks, spawn_element_drain, ElementShared, EventSink,
    PlaybackBackend,
};
use crate::error::{Error, Result};
use crate::platform::VideoSurface;
use crate::types::{
    AudioTrack, CapabilitySet, CredentialMode, HdrFormat, LoadOptions, PlayerConfig, PlayerEvent,
    Resolution, SubtitleTrack, VideoCodec,
};
use async_trait::async_trait;
use m3u8_rs::{AlternativeMediaType, MasterPlaylist};
use reqwest::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One rung of the variant ladder
#[derive(Debug, Clone)]
pub struct Variant {
    pub uri: Url,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub codec: VideoCodec,
    pub hdr: Option<HdrFormat>,
}

/// A codec/range tier in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecTier {
    pub codec: VideoCodec,
    pub hdr: Option<HdrFormat>,
}

/// Capability-gated codec preference, best first. Unsupported tiers are
/// absent, not merely deprioritized.
pub fn codec_preference(caps: &CapabilitySet) -> Vec<CodecTier> {
    let mut tiers = Vec::new();
    if !caps.dolby_vision.is_empty() {
        tiers.push(CodecTier {
            codec: VideoCodec::Hevc,
            hdr: Some(HdrFormat::DolbyVision),
        });
    }
    if caps.hdr10 {
        tiers.push(CodecTier {
            codec: VideoCodec::Hevc,
            hdr: Some(HdrFormat::Hdr10),
        });
    }
    if caps.hevc {
        tiers.push(CodecTier {
            codec: VideoCodec::Hevc,
            hdr: None,
        });
    }
    if caps.av1 {
        tiers.push(CodecTier {
            codec: VideoCodec::Av1,
            hdr: None,
        });
    }
    if caps.vp9 {
        tiers.push(CodecTier {
            codec: VideoCodec::Vp9,
            hdr: None,
        });
    }
    if caps.h264 {
        tiers.push(CodecTier {
            codec: VideoCodec::H264,
            hdr: None,
        });
    }
    tiers
}

/// Parse codec and dynamic range out of a CODECS attribute
pub fn parse_codecs(codecs: &str) -> (VideoCodec, Option<HdrFormat>) {
    let lower = codecs.to_lowercase();
    if lower.contains("dvh1") || lower.contains("dvhe") {
        return (VideoCodec::Hevc, Some(HdrFormat::DolbyVision));
    }
    if lower.contains("hvc1.2") || lower.contains("hev1.2") {
        return (VideoCodec::Hevc, Some(HdrFormat::Hdr10));
    }
    if lower.contains("hvc1") || lower.contains("hev1") {
        return (VideoCodec::Hevc, None);
    }
    if lower.contains("av01") {
        return (VideoCodec::Av1, None);
    }
    if lower.contains("vp09") || lower.contains("vp9") {
        return (VideoCodec::Vp9, None);
    }
    if lower.contains("avc1") || lower.contains("avc3") {
        return (VideoCodec::H264, None);
    }
    (VideoCodec::Unknown, None)
}

/// Pick the initial variant: best bandwidth within the cap for the highest
/// supported tier that the manifest offers
pub fn select_variant(
    variants: &[Variant],
    tiers: &[CodecTier],
    caps: &CapabilitySet,
) -> Option<usize> {
    let within_cap = |v: &Variant| {
        v.bandwidth <= caps.max_bandwidth_bps
            && v.resolution
                .map(|r| r.height <= caps.max_resolution.height)
                .unwrap_or(true)
    };

    for tier in tiers {
        let best = variants
            .iter()
            .enumerate()
            .filter(|(_, v)| v.codec == tier.codec && v.hdr == tier.hdr && within_cap(v))
            .max_by_key(|(_, v)| v.bandwidth);
        if let Some((idx, _)) = best {
            return Some(idx);
        }
    }

    // Nothing matched the preference list; take the lowest rung so playback
    // still has a chance
    variants
        .iter()
        .enumerate()
        .filter(|(_, v)| within_cap(v))
        .min_by_key(|(_, v)| v.bandwidth)
        .map(|(idx, _)| idx)
}

struct AdaptiveSession {
    variants: Vec<Variant>,
    current: usize,
    audio: Vec<AudioTrack>,
    subtitles: Vec<SubtitleTrack>,
    credentials: CredentialMode,
}

/// Backend adapter for the manifest-driven adaptive streaming engine
pub struct AdaptiveManifestAdapter {
    surface: Arc<VideoSurface>,
    caps: CapabilitySet,
    config: PlayerConfig,
    client: Client,
    shared: Arc<ElementShared>,
    session: RwLock<Option<AdaptiveSession>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl AdaptiveManifestAdapter {
    pub fn new(surface: Arc<VideoSurface>, caps: CapabilitySet, config: PlayerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            surface,
            caps,
            config,
            client,
            shared: Arc::new(ElementShared::new(EventSink::new())),
            session: RwLock::new(None),
            drain: Mutex::new(None),
        }
    }

    /// Fetch a manifest with bounded retries and backoff. Client errors are
    /// returned immediately; retries cannot help a 4xx.
    async fn fetch_manifest(&self, url: &Url) -> Result<String> {
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_err = None;

        for attempt in 0..self.config.retry_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        return Err(Error::Network {
                            status: Some(status.as_u16()),
                            message: format!("manifest request rejected: {}", status),
                        });
                    }
                    if status.is_server_error() {
                        warn!(status = status.as_u16(), attempt, "Manifest fetch failed");
                        last_err = Some(Error::Network {
                            status: Some(status.as_u16()),
                            message: format!("manifest request failed: {}", status),
                        });
                        continue;
                    }
                    return response
                        .text()
                        .await
                        .map_err(|e| Error::ManifestFetch(e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Manifest fetch transport failure");
                    last_err = Some(Error::ManifestFetch(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::ManifestFetch("retries exhausted".into())))
    }

    fn build_variants(&self, master: &MasterPlaylist, base_url: &Url) -> Result<Vec<Variant>> {
        let tiers = codec_preference(&self.caps);
        let mut variants = Vec::new();

        for variant in &master.variants {
            let uri = base_url
                .join(&variant.uri)
                .map_err(|e| Error::ManifestParse(format!("invalid variant URI: {}", e)))?;
            let (codec, hdr) = variant
                .codecs
                .as_ref()
                .map(|c| parse_codecs(c))
                .unwrap_or((VideoCodec::H264, None));

            // Premium-range variants the platform cannot decode are dropped
            // here so quality selection never sees them
            if !tiers.iter().any(|t| t.codec == codec && t.hdr == hdr) {
                debug!(codecs = ?variant.codecs, "Dropping unsupported variant");
                continue;
            }

            variants.push(Variant {
                uri,
                bandwidth: variant.bandwidth,
                resolution: variant.resolution.map(|r| Resolution {
                    width: r.width as u32,
                    height: r.height as u32,
                }),
                codec,
                hdr,
            });
        }

        variants.sort_by_key(|v| v.bandwidth);
        Ok(variants)
    }

    fn build_tracks(
        &self,
        master: &MasterPlaylist,
        options: &LoadOptions,
    ) -> (Vec<AudioTrack>, Vec<SubtitleTrack>) {
        let mut audio = Vec::new();
        let mut subtitles = Vec::new();

        for alt in &master.alternatives {
            match alt.media_type {
                AlternativeMediaType::Audio => {
                    let id = audio.len() as u32;
                    audio.push(AudioTrack {
                        id,
                        language: alt.language.clone().unwrap_or_else(|| "und".into()),
                        label: alt.name.clone(),
                        codec: None,
                        channels: alt.channels.as_ref().and_then(|c| c.parse().ok()),
                        active: options.audio_track_id.map(|t| t == id).unwrap_or(alt.default),
                    });
                }
                AlternativeMediaType::Subtitles => {
                    let id = subtitles.len() as u32;
                    subtitles.push(SubtitleTrack {
                        id,
                        language: alt.language.clone().unwrap_or_else(|| "und".into()),
                        label: alt.name.clone(),
                        forced: alt.forced,
                        active: options.subtitle_track_id == Some(id),
                    });
                }
                _ => {}
            }
        }

        (audio, subtitles)
    }

    async fn assign_current_variant(&self) -> Result<()> {
        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return Err(Error::NoMedia);
        };
        let variant = &session.variants[session.current];
        self.surface
            .element()
            .set_source(&variant.uri, session.credentials)
            .await?;
        self.shared.sink.emit(PlayerEvent::QualityChange {
            resolution: variant.resolution,
            bandwidth: variant.bandwidth,
        });
        Ok(())
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

    /// Build the session from fetched manifest content and start playback
    /// of the selected variant. `Loaded` is emitted before the first
    /// `QualityChange`.
    async fn apply_manifest(&self, url: &Url, content: &str, options: LoadOptions) -> Result<()> {
        let credentials = options
            .media_source
            .as_ref()
            .map(|s| s.credential_mode(url))
            .unwrap_or(CredentialMode::Omit);

        let master = m3u8_rs::parse_master_playlist_res(content.as_bytes())
            .map_err(|e| Error::ManifestParse(format!("{:?}", e)))?;

        let variants = self.build_variants(&master, url)?;
        if variants.is_empty() {
            return Err(Error::NoSuitableVariant);
        }
        let tiers = codec_preference(&self.caps);
        let current = select_variant(&variants, &tiers, &self.caps).ok_or(Error::NoSuitableVariant)?;
        let (audio, subtitles) = self.build_tracks(&master, &options);

        info!(
            variants = variants.len(),
            selected = current,
            bandwidth = variants[current].bandwidth,
            codec = %variants[current].codec,
            "Manifest loaded"
        );

        *self.session.write().await = Some(AdaptiveSession {
            variants,
            current,
            audio,
            subtitles,
            credentials,
        });

        // Start position is applied by the drain once metadata arrives
        *self.shared.pending_start.write().await = Some(options.start_position);
        self.ensure_drain().await;
        self.shared.sink.emit(PlayerEvent::Loaded);
        self.assign_current_variant().await
    }
}

#[async_trait]
impl PlaybackBackend for AdaptiveManifestAdapter {
    async fn initialize(&self) -> bool {
        // The engine needs the runtime's media element plus a type-support
        // facility that does not deny baseline playback outright
        let support = self
            .surface
            .type_support()
            .supports(r#"video/mp4; codecs="avc1.42E01E""#);
        let available = support != crate::platform::Support::No;
        debug!(available, "Adaptive manifest engine availability");
        available
    }

    #[instrument(skip(self, options), fields(url = %url))]
    async fn load(&self, url: &Url, options: LoadOptions) -> Result<()> {
        // Tear down any prior engine session bound to this surface
        if self.session.write().await.take().is_some() {
            self.surface.element().clear_source().await;
        }

        let content = self.fetch_manifest(url).await?;
        self.apply_manifest(url, &content, options).await
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
        debug!("Adaptive engine: re-assigning current variant after decode error");
        let position = self.current_time().await;
        *self.shared.pending_start.write().await = Some(position);
        self.assign_current_variant().await
    }

    async fn swap_audio_codec(&self) -> Result<()> {
        // Step down one rung; the lower variant usually carries the plain
        // AAC audio configuration
        {
            let mut session = self.session.write().await;
            let Some(session) = session.as_mut() else {
                return Err(Error::NoMedia);
            };
            if session.current > 0 {
                session.current -= 1;
            }
        }
        let position = self.current_time().await;
        *self.shared.pending_start.write().await = Some(position);
        self.assign_current_variant().await
    }

    async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.session.write().await = None;
        self.surface.element().clear_source().await;
        if let Some(handle) = self.drain.lock().await.take() {
            handle.abort();
        }
        debug!("Adaptive manifest adapter destroyed");
    }

    fn name(&self) -> &'static str {
        "adaptive-manifest"
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.sink.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ElementEvent, MediaElement, NullTypeSupport, Support};
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn variant(bandwidth: u64, height: u32, codec: VideoCodec, hdr: Option<HdrFormat>) -> Variant {
        Variant {
            uri: Url::parse("https://cdn.example/v.m3u8").unwrap(),
            bandwidth,
            resolution: Some(Resolution::new(height * 16 / 9, height)),
            codec,
            hdr,
        }
    }

    #[test]
    fn test_parse_codecs() {
        assert_eq!(parse_codecs("avc1.640028"), (VideoCodec::H264, None));
        assert_eq!(parse_codecs("hvc1.1.6.L93.B0"), (VideoCodec::Hevc, None));
        assert_eq!(
            parse_codecs("hvc1.2.4.L153.B0"),
            (VideoCodec::Hevc, Some(HdrFormat::Hdr10))
        );
        assert_eq!(
            parse_codecs("dvhe.05.09"),
            (VideoCodec::Hevc, Some(HdrFormat::DolbyVision))
        );
        assert_eq!(parse_codecs("av01.0.01M.08"), (VideoCodec::Av1, None));
    }

    #[test]
    fn test_preference_omits_premium_without_support() {
        let caps = CapabilitySet::default();
        let tiers = codec_preference(&caps);
        assert_eq!(
            tiers,
            vec![CodecTier {
                codec: VideoCodec::H264,
                hdr: None
            }]
        );
    }

    #[test]
    fn test_preference_orders_premium_first() {
        let caps = CapabilitySet {
            hevc: true,
            hevc_main10: true,
            hdr10: true,
            dolby_vision: vec![crate::types::DolbyVisionProfile::Profile8],
            ..Default::default()
        };
        let tiers = codec_preference(&caps);
        assert_eq!(tiers[0].hdr, Some(HdrFormat::DolbyVision));
        assert_eq!(tiers[1].hdr, Some(HdrFormat::Hdr10));
        assert_eq!(tiers.last().unwrap().codec, VideoCodec::H264);
    }

    #[test]
    fn test_select_ignores_premium_variants_on_sdr_platform() {
        let caps = CapabilitySet::default();
        let tiers = codec_preference(&caps);
        let variants = vec![
            variant(4_000_000, 1080, VideoCodec::H264, None),
            variant(12_000_000, 2160, VideoCodec::Hevc, Some(HdrFormat::DolbyVision)),
        ];
        let idx = select_variant(&variants, &tiers, &caps).unwrap();
        assert_eq!(variants[idx].codec, VideoCodec::H264);
    }

    #[test]
    fn test_select_respects_bandwidth_cap() {
        let caps = CapabilitySet {
            max_bandwidth_bps: 5_000_000,
            ..Default::default()
        };
        let tiers = codec_preference(&caps);
        let variants = vec![
            variant(2_000_000, 480, VideoCodec::H264, None),
            variant(4_500_000, 720, VideoCodec::H264, None),
            variant(8_000_000, 1080, VideoCodec::H264, None),
        ];
        let idx = select_variant(&variants, &tiers, &caps).unwrap();
        assert_eq!(variants[idx].bandwidth, 4_500_000);
    }

    /// Element stub recording source assignments and track selections
    struct RecordingElement {
        sources: Mutex<Vec<Url>>,
        audio_selections: Mutex<Vec<u32>>,
    }

    impl RecordingElement {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sources: Mutex::new(Vec::new()),
                audio_selections: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MediaElement for RecordingElement {
        async fn set_source(&self, url: &Url, _credentials: CredentialMode) -> Result<()> {
            self.sources.lock().await.push(url.clone());
            Ok(())
        }
        async fn clear_source(&self) {}
        async fn open_stream(&self, _mime_type: &str) -> Result<()> {
            Ok(())
        }
        async fn append_segment(&self, _data: Bytes) -> Result<()> {
            Ok(())
        }
        async fn end_stream(&self) -> Result<()> {
            Ok(())
        }
        async fn play(&self) -> Result<()> {
            Ok(())
        }
        async fn pause(&self) -> Result<()> {
            Ok(())
        }
        async fn set_current_time(&self, _seconds: f64) -> Result<()> {
            Ok(())
        }
        async fn set_volume(&self, _volume: f64) -> Result<()> {
            Ok(())
        }
        async fn select_audio_track(&self, id: u32) -> Result<()> {
            self.audio_selections.lock().await.push(id);
            Ok(())
        }
        async fn select_subtitle_track(&self, _id: Option<u32>) -> Result<()> {
            Ok(())
        }
        async fn current_time(&self) -> f64 {
            0.0
        }
        async fn duration(&self) -> Option<f64> {
            None
        }
        async fn volume(&self) -> f64 {
            1.0
        }
        async fn paused(&self) -> bool {
            true
        }
        fn native_segmented_support(&self) -> Support {
            Support::No
        }
        async fn take_events(&self) -> Option<mpsc::Receiver<ElementEvent>> {
            None
        }
    }

    fn adapter_for(element: Arc<RecordingElement>) -> AdaptiveManifestAdapter {
        let surface = Arc::new(VideoSurface::new(element, None, Arc::new(NullTypeSupport)));
        AdaptiveManifestAdapter::new(surface, CapabilitySet::default(), PlayerConfig::default())
    }

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

    #[tokio::test]
    async fn test_manifest_emits_loaded_before_quality_change() {
        let element = RecordingElement::new();
        let adapter = adapter_for(element.clone());
        let mut events = adapter.subscribe();

        let manifest = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\"\n\
            high.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720,CODECS=\"avc1.640028,mp4a.40.2\"\n\
            low.m3u8\n";
        let url = Url::parse("https://server.example/videos/1/master.m3u8").unwrap();
        adapter
            .apply_manifest(&url, manifest, LoadOptions::default())
            .await
            .unwrap();

        assert!(matches!(events.try_recv(), Ok(PlayerEvent::Loaded)));
        assert!(matches!(
            events.try_recv(),
            Ok(PlayerEvent::QualityChange {
                bandwidth: 4_000_000,
                ..
            })
        ));
        assert_eq!(element.sources.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_audio_selection_reaches_element() {
        let element = RecordingElement::new();
        let adapter = adapter_for(element.clone());

        *adapter.session.write().await = Some(AdaptiveSession {
            variants: vec![variant(4_000_000, 1080, VideoCodec::H264, None)],
            current: 0,
            audio: vec![audio(0, "en", true), audio(1, "fr", false)],
            subtitles: Vec::new(),
            credentials: CredentialMode::Omit,
        });

        assert!(adapter.select_audio_track(1).await);
        assert_eq!(element.audio_selections.lock().await.as_slice(), &[1]);

        // Out-of-range ids never reach the element
        assert!(!adapter.select_audio_track(9).await);
        assert_eq!(element.audio_selections.lock().await.as_slice(), &[1]);
    }

    #[test]
    fn test_select_prefers_hdr_when_supported() {
        let caps = CapabilitySet {
            hevc: true,
            hevc_main10: true,
            hdr10: true,
            max_bandwidth_bps: 120_000_000,
            max_resolution: Resolution::UHD_4K,
            ..Default::default()
        };
        let tiers = codec_preference(&caps);
        let variants = vec![
            variant(4_000_000, 1080, VideoCodec::H264, None),
            variant(12_000_000, 2160, VideoCodec::Hevc, Some(HdrFormat::Hdr10)),
        ];
        let idx = select_variant(&variants, &tiers, &caps).unwrap();
        assert_eq!(variants[idx].hdr, Some(HdrFormat::Hdr10));
    }
}
