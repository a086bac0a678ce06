//! Platform seams for the playback engine
//!
//! The engine never talks to a concrete runtime directly. Three traits
//! stand in for the platform facilities the adapters need:
//! - [`TypeSupport`] - the runtime's container/codec support query
//! - [`MediaElement`] - the in-page playback surface handle
//! - [`MediaBridge`] - the out-of-process native media service channel
//!
//! A [`VideoSurface`] bundles these for one on-screen video area. At most
//! one adapter is alive per surface at any time.

use crate::error::Result;
use crate::types::{AudioTrack, CredentialMode, SubtitleTrack};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Answer from the platform's type-support query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Probably,
    Maybe,
    No,
    /// The facility is absent or failed; treated as unsupported
    Unknown,
}

impl Support {
    /// True only for a confident positive answer
    pub fn is_supported(&self) -> bool {
        matches!(self, Support::Probably)
    }
}

/// Container/codec support query exposed by the runtime
pub trait TypeSupport: Send + Sync {
    /// Query support for a full content type string,
    /// e.g. `video/mp4; codecs="hvc1.2.4.L153.B0"`
    fn supports(&self, content_type: &str) -> Support;
}

/// Type-support stand-in for runtimes with no query facility
pub struct NullTypeSupport;

impl TypeSupport for NullTypeSupport {
    fn supports(&self, _content_type: &str) -> Support {
        Support::Unknown
    }
}

/// Decode-level error codes reported by a media element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
}

/// Events raised by a media element
#[derive(Debug, Clone)]
pub enum ElementEvent {
    /// Metadata is available; start position may be applied from here on
    LoadedMetadata { duration: Option<f64> },
    CanPlay,
    Playing,
    Pause,
    /// Playback stalled waiting for data
    Waiting,
    TimeUpdate(f64),
    Seeked(f64),
    Ended,
    Error(MediaErrorCode),
}

/// The in-page playback surface handle.
///
/// Transport getters return last-known cached state and never block.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Assign a source URL directly to the surface
    async fn set_source(&self, url: &Url, credentials: CredentialMode) -> Result<()>;

    /// Detach any assigned or streamed source
    async fn clear_source(&self);

    /// Open a streaming sink for segment data (MSE-style); used by the
    /// embedded segmented-stream player
    async fn open_stream(&self, mime_type: &str) -> Result<()>;

    /// Append one segment of media data to the open stream
    async fn append_segment(&self, data: Bytes) -> Result<()>;

    /// Signal end of the segment stream
    async fn end_stream(&self) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn set_current_time(&self, seconds: f64) -> Result<()>;
    async fn set_volume(&self, volume: f64) -> Result<()>;

    /// Activate an element-exposed audio track
    async fn select_audio_track(&self, id: u32) -> Result<()>;

    /// Activate an element-exposed text track; `None` disables subtitles
    async fn select_subtitle_track(&self, id: Option<u32>) -> Result<()>;

    async fn current_time(&self) -> f64;
    async fn duration(&self) -> Option<f64>;
    async fn volume(&self) -> f64;
    async fn paused(&self) -> bool;

    /// Whether the runtime plays segmented (HLS-style) sources natively
    fn native_segmented_support(&self) -> Support;

    /// Take the element's event stream. Yields `None` once taken.
    async fn take_events(&self) -> Option<mpsc::Receiver<ElementEvent>>;
}

/// Method names on the native media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeMethod {
    Load,
    Play,
    Pause,
    Seek,
    SetVolume,
    Unload,
}

impl BridgeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMethod::Load => "load",
            BridgeMethod::Play => "play",
            BridgeMethod::Pause => "pause",
            BridgeMethod::Seek => "seek",
            BridgeMethod::SetVolume => "setVolume",
            BridgeMethod::Unload => "unload",
        }
    }
}

impl std::fmt::Display for BridgeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription events from the native media service.
///
/// Timestamp fields are in the service's millisecond units; adapters
/// translate to caller-facing seconds.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    CurrentTime {
        position_ms: u64,
    },
    BufferingStart,
    BufferingEnd,
    /// Stream metadata reported once the service has opened the source
    SourceInfo {
        duration_ms: u64,
        audio_tracks: Vec<AudioTrack>,
        subtitle_tracks: Vec<SubtitleTrack>,
    },
    VideoInfo {
        width: u32,
        height: u32,
    },
    AudioInfo { codec: String, channels: u32 },
    LoadCompleted,
    Playing,
    Paused,
    SeekDone { position_ms: u64 },
    EndOfStream,
    Error { code: i32, message: String },
}

/// Asynchronous request/response + subscription channel to the platform's
/// out-of-process media service
#[async_trait]
pub trait MediaBridge: Send + Sync {
    /// Issue a request and await the service's acknowledgment
    async fn call(&self, method: BridgeMethod, params: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Take the service's event subscription. Yields `None` once taken.
    async fn take_events(&self) -> Option<mpsc::Receiver<BridgeEvent>>;
}

/// One on-screen video area and the platform handles bound to it
pub struct VideoSurface {
    element: Arc<dyn MediaElement>,
    bridge: Option<Arc<dyn MediaBridge>>,
    type_support: Arc<dyn TypeSupport>,
}

impl VideoSurface {
    pub fn new(
        element: Arc<dyn MediaElement>,
        bridge: Option<Arc<dyn MediaBridge>>,
        type_support: Arc<dyn TypeSupport>,
    ) -> Self {
        Self {
            element,
            bridge,
            type_support,
        }
    }

    pub fn element(&self) -> Arc<dyn MediaElement> {
        Arc::clone(&self.element)
    }

    pub fn bridge(&self) -> Option<Arc<dyn MediaBridge>> {
        self.bridge.as_ref().map(Arc::clone)
    }

    pub fn type_support(&self) -> Arc<dyn TypeSupport> {
        Arc::clone(&self.type_support)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_is_supported() {
        assert!(Support::Probably.is_supported());
        assert!(!Support::Maybe.is_supported());
        assert!(!Support::No.is_supported());
        assert!(!Support::Unknown.is_supported());
    }

    #[test]
    fn test_bridge_method_names() {
        assert_eq!(BridgeMethod::Load.as_str(), "load");
        assert_eq!(BridgeMethod::SetVolume.as_str(), "setVolume");
        assert_eq!(BridgeMethod::Unload.as_str(), "unload");
    }

    #[test]
    fn test_null_type_support() {
        assert_eq!(NullTypeSupport.supports("video/mp4"), Support::Unknown);
    }
}
