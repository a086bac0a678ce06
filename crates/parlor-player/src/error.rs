//! Error types for the Parlor playback engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Load/stream errors
    #[error("Network error (status {status:?}): {message}")]
    Network { status: Option<u16>, message: String },

    #[error("Media decode error: {0}")]
    MediaDecode(String),

    #[error("Media not supported: {0}")]
    MediaNotSupported(String),

    #[error("Fatal streaming error: {0}")]
    FatalStreaming(String),

    #[error("Media server error: {0}")]
    Server(String),

    #[error("No media to play")]
    NoMedia,

    // Adapter selection
    #[error("No playback adapter available for this surface")]
    NoAdapterAvailable,

    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("No suitable variant found in manifest")]
    NoSuitableVariant,

    // Segment errors
    #[error("Failed to fetch segment: {url}")]
    SegmentFetch { url: String, source: reqwest::Error },

    // Timeouts
    #[error("Load timed out after {seconds}s")]
    LoadTimeout { seconds: u64 },

    // Native pipeline bridge
    #[error("Bridge call '{method}' failed: {message}")]
    BridgeCall { method: String, message: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified error kind, carried on the uniform `error` event so callers
/// can decide on messaging and retry without inspecting backend detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    MediaDecode,
    MediaNotSupported,
    FatalStreaming,
    Server,
    NoMedia,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::MediaDecode => write!(f, "media-decode"),
            ErrorKind::MediaNotSupported => write!(f, "media-not-supported"),
            ErrorKind::FatalStreaming => write!(f, "fatal-streaming"),
            ErrorKind::Server => write!(f, "server"),
            ErrorKind::NoMedia => write!(f, "no-media"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Classified kind for event payloads
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. }
            | Error::ManifestFetch(_)
            | Error::SegmentFetch { .. }
            | Error::Http(_)
            | Error::LoadTimeout { .. } => ErrorKind::Network,
            Error::MediaDecode(_) => ErrorKind::MediaDecode,
            Error::MediaNotSupported(_) | Error::NoSuitableVariant => ErrorKind::MediaNotSupported,
            Error::FatalStreaming(_) | Error::ManifestParse(_) | Error::BridgeCall { .. } => {
                ErrorKind::FatalStreaming
            }
            Error::Server(_) => ErrorKind::Server,
            Error::NoMedia => ErrorKind::NoMedia,
            Error::NoAdapterAvailable
            | Error::InvalidConfig(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status attached to the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Network { status, .. } => *status,
            Error::SegmentFetch { source, .. } => source.status().map(|s| s.as_u16()),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if this error is recoverable without tearing down the session
    pub fn is_recoverable(&self) -> bool {
        match self.kind() {
            ErrorKind::MediaDecode => true,
            // 4xx means a misconfigured or invalid stream; retries cannot help
            ErrorKind::Network => !matches!(self.status(), Some(s) if (400..500).contains(&s)),
            _ => false,
        }
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Network { .. } => "NETWORK",
            Error::MediaDecode(_) => "MEDIA_DECODE",
            Error::MediaNotSupported(_) => "MEDIA_UNSUPPORTED",
            Error::FatalStreaming(_) => "FATAL_STREAMING",
            Error::Server(_) => "SERVER",
            Error::NoMedia => "NO_MEDIA",
            Error::NoAdapterAvailable => "NO_ADAPTER",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::NoSuitableVariant => "NO_VARIANT",
            Error::SegmentFetch { .. } => "SEGMENT_FETCH",
            Error::LoadTimeout { .. } => "LOAD_TIMEOUT",
            Error::BridgeCall { .. } => "BRIDGE_CALL",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
            Error::Http(_) => "HTTP",
            Error::Io(_) => "IO",
        }
    }
}
