//! Error classification and time-boxed recovery escalation
//!
//! Raw backend failures are mapped into a small taxonomy with a recommended
//! disposition. Recoverable decode errors go through a two-step escalation:
//! a generic media recovery first, then an audio codec swap, each gated by
//! an independent cooldown. When both cooldowns are still warm the session
//! is torn down and the error surfaces to the caller.
//!
//! Recovery state is scoped per session. Cooldowns from a previous item
//! must never suppress recovery on a new one, so `reset` runs on every load.

use crate::error::{Error, ErrorKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Recommended handling for a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Destroy the session and surface to the caller immediately
    Fatal,
    /// The backend's internal retry path handles it; do nothing here
    BackendRetry,
    /// Run the recovery escalation
    Escalate,
}

/// Map a classified kind plus HTTP status into a disposition
pub fn classify(kind: ErrorKind, status: Option<u16>) -> ErrorDisposition {
    match kind {
        ErrorKind::Network => match status {
            // 4xx indicates a misconfigured or invalid stream
            Some(s) if (400..500).contains(&s) => ErrorDisposition::Fatal,
            // 5xx or pure transport failure: segment reload can help
            _ => ErrorDisposition::BackendRetry,
        },
        ErrorKind::MediaDecode => ErrorDisposition::Escalate,
        ErrorKind::FatalStreaming
        | ErrorKind::MediaNotSupported
        | ErrorKind::Server
        | ErrorKind::NoMedia
        | ErrorKind::Internal => ErrorDisposition::Fatal,
    }
}

/// Convenience wrapper over [`classify`] for full errors
pub fn classify_error(error: &Error) -> ErrorDisposition {
    classify(error.kind(), error.status())
}

/// Escalation step chosen for one decode error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Generic "recover media error" on the backend
    RecoverMedia,
    /// Swap the audio codec and recover again
    SwapAudioCodec,
    /// Both steps are inside their cooldown window; give up
    Fail,
}

/// Per-session record of recovery attempts.
///
/// The two timestamps are tracked independently: a third error inside the
/// cooldown of only one step still attempts the other.
pub struct RecoveryController {
    cooldown: Duration,
    last_media_recover: Option<Instant>,
    last_codec_swap: Option<Instant>,
}

impl RecoveryController {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_media_recover: None,
            last_codec_swap: None,
        }
    }

    /// Forget all attempt timestamps; called when a new load begins
    pub fn reset(&mut self) {
        self.last_media_recover = None;
        self.last_codec_swap = None;
    }

    /// Pick the next escalation step for a recoverable decode error and
    /// record its timestamp
    pub fn next_action(&mut self) -> RecoveryAction {
        let now = Instant::now();

        if self.cooled_down(self.last_media_recover, now) {
            self.last_media_recover = Some(now);
            debug!("Recovery: generic media recovery");
            return RecoveryAction::RecoverMedia;
        }

        if self.cooled_down(self.last_codec_swap, now) {
            self.last_codec_swap = Some(now);
            debug!("Recovery: audio codec swap");
            return RecoveryAction::SwapAudioCodec;
        }

        debug!("Recovery exhausted");
        RecoveryAction::Fail
    }

    fn cooled_down(&self, last: Option<Instant>, now: Instant) -> bool {
        match last {
            None => true,
            Some(t) => now.duration_since(t) >= self.cooldown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(3);

    #[test]
    fn test_client_error_is_fatal() {
        assert_eq!(
            classify(ErrorKind::Network, Some(404)),
            ErrorDisposition::Fatal
        );
        assert_eq!(
            classify(ErrorKind::Network, Some(403)),
            ErrorDisposition::Fatal
        );
    }

    #[test]
    fn test_server_error_retries_in_backend() {
        assert_eq!(
            classify(ErrorKind::Network, Some(503)),
            ErrorDisposition::BackendRetry
        );
        assert_eq!(
            classify(ErrorKind::Network, None),
            ErrorDisposition::BackendRetry
        );
    }

    #[test]
    fn test_decode_error_escalates() {
        assert_eq!(
            classify(ErrorKind::MediaDecode, None),
            ErrorDisposition::Escalate
        );
        assert_eq!(
            classify(ErrorKind::FatalStreaming, None),
            ErrorDisposition::Fatal
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_error_in_window_swaps_codec() {
        let mut controller = RecoveryController::new(COOLDOWN);

        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);

        // Second decode error one second later: generic step is warm
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(controller.next_action(), RecoveryAction::SwapAudioCodec);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_error_in_both_windows_fails() {
        let mut controller = RecoveryController::new(COOLDOWN);

        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(controller.next_action(), RecoveryAction::SwapAudioCodec);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(controller.next_action(), RecoveryAction::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_tracked_independently() {
        let mut controller = RecoveryController::new(COOLDOWN);

        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(controller.next_action(), RecoveryAction::SwapAudioCodec);

        // 4s after the first step: generic cooldown expired, swap still warm
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry_allows_recovery_again() {
        let mut controller = RecoveryController::new(COOLDOWN);

        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_cooldowns() {
        let mut controller = RecoveryController::new(COOLDOWN);

        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
        assert_eq!(controller.next_action(), RecoveryAction::SwapAudioCodec);
        assert_eq!(controller.next_action(), RecoveryAction::Fail);

        controller.reset();
        assert_eq!(controller.next_action(), RecoveryAction::RecoverMedia);
    }
}
