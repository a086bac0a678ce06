//! Parlor Player - Adaptive Playback Engine for Parlor
//!
//! This crate provides the playback core for the Parlor TV client:
//! - Device capability probing (codec, HDR, resolution support)
//! - Runtime backend selection across three playback adapters
//! - HLS manifest parsing and capability-gated variant selection
//! - Error classification and staged in-place recovery
//! - Uniform session state and event stream for the application shell
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Parlor Player                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  Capability  │  │   Adapter    │  │   Recovery   │          │
//! │  │    Prober    │  │   Factory    │  │  Controller  │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │   Adaptive   │  │   Native    │  │    Direct    │           │
//! │  │   Manifest   │  │  Pipeline   │  │   Element    │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod platform;
pub mod capability;
pub mod recovery;
pub mod backend;
pub mod factory;
pub mod session;

pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use platform::{
    BridgeEvent, BridgeMethod, ElementEvent, MediaBridge, MediaElement, MediaErrorCode, Support,
    TypeSupport, VideoSurface,
};
pub use capability::CapabilityProber;
pub use recovery::{classify, ErrorDisposition, RecoveryAction, RecoveryController};
pub use backend::{
    AdaptiveManifestAdapter, DirectElementAdapter, NativePipelineAdapter, PlaybackBackend,
};
pub use factory::{BackendKind, PlayerFactory};
pub use session::PlaybackSession;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Parlor Player initialized");
}
