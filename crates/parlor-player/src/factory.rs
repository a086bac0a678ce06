//! Adapter factory - runtime backend selection
//!
//! Builds an ordered candidate list from the playback intent and walks it,
//! initializing each adapter against the surface until one succeeds. A
//! candidate failing to initialize is logged and skipped; one backend's
//! platform-detection failure must never abort the whole selection.

use crate::backend::{
    is_segmented, AdaptiveManifestAdapter, DirectElementAdapter, NativePipelineAdapter,
    PlaybackBackend,
};
use crate::capability::CapabilityProber;
use crate::error::{Error, Result};
use crate::platform::VideoSurface;
use crate::types::{BackendPreference, PlaybackIntent, PlayerConfig};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Backend candidates in factory order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    AdaptiveManifest,
    NativePipeline,
    DirectElement,
}

/// Candidate order for a preference hint.
///
/// Transcoded/segmented streams try the direct element first: its
/// segmented-stream fallback has proven more broadly compatible across
/// embedded runtimes than the manifest-driven engine.
pub fn candidate_order(preference: BackendPreference) -> &'static [BackendKind] {
    use BackendKind::*;
    match preference {
        BackendPreference::NativePipeline => &[NativePipeline, DirectElement, AdaptiveManifest],
        BackendPreference::ManifestAdaptive => &[DirectElement, AdaptiveManifest],
        BackendPreference::DirectElement => &[DirectElement, AdaptiveManifest],
        BackendPreference::Auto => &[AdaptiveManifest, DirectElement],
    }
}

/// Preference actually used for ordering. An unhinted segmented source is
/// routed like a transcoded stream; explicit hints are never overridden.
fn effective_preference(intent: &PlaybackIntent) -> BackendPreference {
    match intent.preference {
        BackendPreference::Auto if is_segmented(&intent.url, intent.mime_type.as_deref()) => {
            BackendPreference::ManifestAdaptive
        }
        preference => preference,
    }
}

/// Creates playback adapters bound to video surfaces
pub struct PlayerFactory {
    prober: Arc<CapabilityProber>,
    config: PlayerConfig,
}

impl PlayerFactory {
    pub fn new(prober: Arc<CapabilityProber>, config: PlayerConfig) -> Self {
        Self { prober, config }
    }

    /// Select and initialize an adapter for the surface.
    ///
    /// Candidates are tried strictly in order and never concurrently
    /// against the same surface; the first successful `initialize` wins.
    /// Fails with [`Error::NoAdapterAvailable`] only when every candidate
    /// declined.
    #[instrument(skip(self, surface))]
    pub async fn create_player(
        &self,
        surface: Arc<VideoSurface>,
        intent: &PlaybackIntent,
    ) -> Result<Arc<dyn PlaybackBackend>> {
        let caps = self.prober.probe().await;

        for kind in candidate_order(effective_preference(intent)) {
            let adapter: Arc<dyn PlaybackBackend> = match kind {
                BackendKind::AdaptiveManifest => Arc::new(AdaptiveManifestAdapter::new(
                    Arc::clone(&surface),
                    caps.clone(),
                    self.config.clone(),
                )),
                BackendKind::NativePipeline => {
                    Arc::new(NativePipelineAdapter::new(Arc::clone(&surface)))
                }
                BackendKind::DirectElement => Arc::new(DirectElementAdapter::new(
                    Arc::clone(&surface),
                    self.config.clone(),
                )),
            };

            if adapter.initialize().await {
                info!(backend = adapter.name(), "Playback adapter selected");
                return Ok(adapter);
            }
            // Release whatever the failed candidate may have grabbed before
            // the next one binds to the surface
            adapter.destroy().await;
            warn!(backend = adapter.name(), "Adapter unavailable, falling through");
        }

        debug!("All playback adapter candidates exhausted");
        Err(Error::NoAdapterAvailable)
    }
}
