//! Platform decode capability probing
//!
//! Detection goes through whatever type-support query the runtime exposes
//! ([`TypeSupport`]). Every advanced flag fails closed: if the facility is
//! absent or a query errs, the flag stays false and only baseline H.264 is
//! assumed. The probe result is memoized per prober instance, so a process
//! that shares one prober pays the cost once.

use crate::platform::{Support, TypeSupport};
use crate::types::{CapabilitySet, DolbyVisionProfile, Resolution};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

// Content type strings handed to the platform query.
const H264: &str = r#"video/mp4; codecs="avc1.640029""#;
const HEVC: &[&str] = &[
    r#"video/mp4; codecs="hvc1.1.6.L153.B0""#,
    r#"video/mp4; codecs="hev1.1.6.L153.B0""#,
];
const HEVC_MAIN10: &[&str] = &[
    r#"video/mp4; codecs="hvc1.2.4.L153.B0""#,
    r#"video/mp4; codecs="hev1.2.4.L153.B0""#,
];
const VP9: &str = r#"video/webm; codecs="vp09.00.50.08""#;
const AV1: &str = r#"video/mp4; codecs="av01.0.08M.08""#;
const DOLBY_VISION_P5: &str = r#"video/mp4; codecs="dvhe.05.09""#;
const DOLBY_VISION_P8: &str = r#"video/mp4; codecs="dvhe.08.09""#;
const EAC3_JOC: &str = r#"audio/mp4; codecs="ec-3"; spatialRendering=true"#;
const UHD_PROBE: &str = r#"video/mp4; codecs="hvc1.1.6.L153.B0"; width=3840; height=2160"#;

/// Probes and caches what the current platform can decode
pub struct CapabilityProber {
    query: Arc<dyn TypeSupport>,
    cache: OnceCell<CapabilitySet>,
}

impl CapabilityProber {
    pub fn new(query: Arc<dyn TypeSupport>) -> Self {
        Self {
            query,
            cache: OnceCell::new(),
        }
    }

    /// Prober that always answers with a fixed capability set; for tests
    /// and for platforms with a vendor-published capability table
    pub fn fixed(caps: CapabilitySet) -> Self {
        Self {
            query: Arc::new(crate::platform::NullTypeSupport),
            cache: OnceCell::new_with(Some(caps)),
        }
    }

    /// Probe platform capabilities. First caller pays the cost; the result
    /// is cached for the prober's lifetime and never errors.
    pub async fn probe(&self) -> CapabilitySet {
        self.cache
            .get_or_init(|| async { self.detect() })
            .await
            .clone()
    }

    fn detect(&self) -> CapabilitySet {
        let supported = |ct: &str| self.query.supports(ct).is_supported();
        let any = |cts: &[&str]| cts.iter().any(|ct| supported(ct));

        let mut dolby_vision = Vec::new();
        if supported(DOLBY_VISION_P5) {
            dolby_vision.push(DolbyVisionProfile::Profile5);
        }
        if supported(DOLBY_VISION_P8) {
            dolby_vision.push(DolbyVisionProfile::Profile8);
        }

        let hevc = any(HEVC);
        let hevc_main10 = any(HEVC_MAIN10);

        let caps = CapabilitySet {
            // Baseline: assumed unless the platform explicitly denies it
            h264: self.query.supports(H264) != Support::No,
            hevc,
            hevc_main10,
            vp9: supported(VP9),
            av1: supported(AV1),
            // HDR10 needs the 10-bit HEVC profile as the carrier
            hdr10: hevc_main10,
            dolby_vision,
            dolby_atmos: supported(EAC3_JOC),
            max_resolution: if supported(UHD_PROBE) {
                Resolution::UHD_4K
            } else {
                Resolution::FHD_1080P
            },
            max_bandwidth_bps: if supported(UHD_PROBE) {
                120_000_000
            } else {
                20_000_000
            },
        };

        debug!(
            hevc = caps.hevc,
            hevc_main10 = caps.hevc_main10,
            av1 = caps.av1,
            vp9 = caps.vp9,
            hdr10 = caps.hdr10,
            dolby_vision = caps.dolby_vision.len(),
            atmos = caps.dolby_atmos,
            max_resolution = %caps.max_resolution,
            "Capability probe complete"
        );

        caps
    }
}
