//! Core types for the Parlor playback engine

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Video codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp9,
    Av1,
    Unknown,
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264/AVC"),
            VideoCodec::Hevc => write!(f, "H.265/HEVC"),
            VideoCodec::Vp9 => write!(f, "VP9"),
            VideoCodec::Av1 => write!(f, "AV1"),
            VideoCodec::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Audio codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
    Ac3,
    Eac3,
    Opus,
    Flac,
    Unknown,
}

/// HDR format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HdrFormat {
    Hdr10,
    DolbyVision,
    Hlg,
}

/// Dolby Vision profile variants that differ in platform support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DolbyVisionProfile {
    /// Profile 5 (single-layer, proprietary IPT)
    Profile5,
    /// Profile 8 (single-layer with HDR10/SDR cross-compatibility)
    Profile8,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }

    pub const HD_720P: Resolution = Resolution { width: 1280, height: 720 };
    pub const FHD_1080P: Resolution = Resolution { width: 1920, height: 1080 };
    pub const UHD_4K: Resolution = Resolution { width: 3840, height: 2160 };
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Platform decode capability, probed once per process.
///
/// Fail-closed: a capability missing from the platform's type-support
/// facility stays `false`, so quality selection degrades rather than fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Baseline codec, assumed supported everywhere
    pub h264: bool,
    pub hevc: bool,
    /// 10-bit HEVC profile (required for HDR10)
    pub hevc_main10: bool,
    pub vp9: bool,
    pub av1: bool,
    pub hdr10: bool,
    pub dolby_vision: Vec<DolbyVisionProfile>,
    /// E-AC-3 with joint object coding (Atmos)
    pub dolby_atmos: bool,
    /// Maximum resolution the decoder reports as safe
    pub max_resolution: Resolution,
    /// Maximum safe bandwidth in bits per second
    pub max_bandwidth_bps: u64,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            h264: true,
            hevc: false,
            hevc_main10: false,
            vp9: false,
            av1: false,
            hdr10: false,
            dolby_vision: Vec::new(),
            dolby_atmos: false,
            max_resolution: Resolution::FHD_1080P,
            max_bandwidth_bps: 20_000_000,
        }
    }
}

impl CapabilitySet {
    /// True when any premium dynamic range format is decodable
    pub fn supports_premium_range(&self) -> bool {
        self.hdr10 || !self.dolby_vision.is_empty()
    }
}

/// Backend preference hint carried by a playback intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendPreference {
    /// Platform-forced native playback
    NativePipeline,
    /// Direct browser media element
    DirectElement,
    /// Transcoded/segmented streams
    ManifestAdaptive,
    /// No hint, default ordering
    Auto,
}

/// Input to the adapter factory, immutable per playback attempt
#[derive(Debug, Clone)]
pub struct PlaybackIntent {
    pub url: Url,
    pub mime_type: Option<String>,
    pub preference: BackendPreference,
}

impl PlaybackIntent {
    pub fn new(url: Url, preference: BackendPreference) -> Self {
        Self {
            url,
            mime_type: None,
            preference,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Origin metadata used to decide the cross-origin credential mode
#[derive(Debug, Clone)]
pub struct MediaSourceInfo {
    /// Origin of the media server this item came from
    pub server_origin: Url,
}

impl MediaSourceInfo {
    /// Credentials are sent only for same-origin media URLs
    pub fn credential_mode(&self, media_url: &Url) -> CredentialMode {
        let same_origin = self.server_origin.scheme() == media_url.scheme()
            && self.server_origin.host() == media_url.host()
            && self.server_origin.port_or_known_default() == media_url.port_or_known_default();
        if same_origin {
            CredentialMode::Include
        } else {
            CredentialMode::Omit
        }
    }
}

/// Credential mode for cross-origin media requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Include,
    Omit,
}

/// Options applied when loading a media item
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Start position in seconds, applied once metadata is available
    pub start_position: f64,
    pub mime_type: Option<String>,
    pub audio_track_id: Option<u32>,
    pub subtitle_track_id: Option<u32>,
    pub media_source: Option<MediaSourceInfo>,
}

/// Audio track exposed by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: u32,
    /// BCP-47 language code
    pub language: String,
    pub label: String,
    pub codec: Option<AudioCodec>,
    pub channels: Option<u8>,
    pub active: bool,
}

/// Subtitle track exposed by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub id: u32,
    pub language: String,
    pub label: String,
    /// Forced subtitles (foreign language parts)
    pub forced: bool,
    pub active: bool,
}

/// Session state tracked uniformly regardless of backend.
///
/// Updated exclusively by the owning adapter in reaction to backend events;
/// callers read it and drive changes through the control surface only.
#[derive(Debug, Clone)]
pub struct PlaySessionState {
    pub current_time: f64,
    pub duration: Option<f64>,
    pub volume: f64,
    pub paused: bool,
    pub buffering: bool,
    pub active_audio_track: Option<u32>,
    /// None means subtitles disabled
    pub active_subtitle_track: Option<u32>,
    pub last_error: Option<ErrorKind>,
}

impl Default for PlaySessionState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: None,
            volume: 1.0,
            paused: true,
            buffering: false,
            active_audio_track: None,
            active_subtitle_track: None,
            last_error: None,
        }
    }
}

/// Uniform event contract relayed to the caller regardless of backend
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Backend accepted the source
    Loaded,
    /// Playback can actually begin; distinct from `Loaded`
    CanPlay,
    Playing,
    Pause,
    Buffering(bool),
    TimeUpdate(f64),
    DurationChange(f64),
    QualityChange {
        resolution: Option<Resolution>,
        bandwidth: u64,
    },
    AudioTrackChange(u32),
    SubtitleTrackChange(Option<u32>),
    VideoInfo {
        width: u32,
        height: u32,
    },
    AudioInfo {
        codec: String,
        channels: u32,
    },
    Seeked(f64),
    Ended,
    Error {
        kind: ErrorKind,
        status: Option<u16>,
        detail: String,
    },
}

/// Player configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Buffering goal while playing (seconds)
    pub buffering_goal: f64,
    /// Rebuffering goal after a stall (seconds)
    pub rebuffering_goal: f64,
    /// Retry attempts for manifest/segment requests
    pub retry_attempts: u32,
    /// Base retry delay in milliseconds (doubled per attempt)
    pub retry_delay_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Overall load timeout in seconds; some platforms stall silently
    /// on an undecodable stream without ever raising an error
    pub load_timeout_secs: u64,
    /// Cooldown between recovery attempts in milliseconds
    pub recovery_cooldown_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffering_goal: 30.0,
            rebuffering_goal: 5.0,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 30_000,
            load_timeout_secs: 30,
            recovery_cooldown_ms: 3000,
        }
    }
}
