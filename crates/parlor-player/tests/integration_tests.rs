//! Integration tests for Parlor Player

use async_trait::async_trait;
use bytes::Bytes;
use parlor_player::{
    AudioTrack, BackendPreference, BridgeEvent, BridgeMethod, CapabilityProber, CapabilitySet,
    CredentialMode, ElementEvent, ErrorKind, LoadOptions, MediaBridge, MediaElement, PlaybackIntent,
    PlaybackSession, PlayerConfig, PlayerEvent, PlayerFactory, Result, Support, TypeSupport,
    VideoSurface,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use url::Url;

// =============================================================================
// Platform mocks
// =============================================================================

/// Type-support table keyed on codec substring
struct TableSupport {
    h264: bool,
}

impl TypeSupport for TableSupport {
    fn supports(&self, content_type: &str) -> Support {
        if content_type.contains("avc1") {
            if self.h264 {
                Support::Probably
            } else {
                Support::No
            }
        } else {
            Support::No
        }
    }
}

/// Media element stub with a one-shot scripted event stream
struct StubElement {
    events_rx: Mutex<Option<mpsc::Receiver<ElementEvent>>>,
    native_hls: Support,
}

impl StubElement {
    fn new() -> (Arc<Self>, mpsc::Sender<ElementEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                events_rx: Mutex::new(Some(rx)),
                native_hls: Support::No,
            }),
            tx,
        )
    }
}

#[async_trait]
impl MediaElement for StubElement {
    async fn set_source(&self, _url: &Url, _credentials: CredentialMode) -> Result<()> {
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
    async fn select_audio_track(&self, _id: u32) -> Result<()> {
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
        self.native_hls
    }
    async fn take_events(&self) -> Option<mpsc::Receiver<ElementEvent>> {
        self.events_rx.lock().await.take()
    }
}

/// Bridge mock recording the method-call sequence and feeding scripted events
struct StubBridge {
    calls: Mutex<Vec<String>>,
    events_rx: Mutex<Option<mpsc::Receiver<BridgeEvent>>>,
}

impl StubBridge {
    fn new() -> (Arc<Self>, mpsc::Sender<BridgeEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                events_rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MediaBridge for StubBridge {
    async fn call(&self, method: BridgeMethod, _params: serde_json::Value) -> Result<serde_json::Value> {
        self.calls.lock().await.push(method.as_str().to_string());
        Ok(json!({}))
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<BridgeEvent>> {
        self.events_rx.lock().await.take()
    }
}

fn surface(
    element: Arc<dyn MediaElement>,
    bridge: Option<Arc<dyn MediaBridge>>,
    h264: bool,
) -> Arc<VideoSurface> {
    Arc::new(VideoSurface::new(
        element,
        bridge,
        Arc::new(TableSupport { h264 }),
    ))
}

fn factory() -> PlayerFactory {
    PlayerFactory::new(
        Arc::new(CapabilityProber::fixed(CapabilitySet::default())),
        PlayerConfig::default(),
    )
}

fn media_url(item: u32) -> Url {
    Url::parse(&format!("https://server.example/items/{item}/video.mkv")).unwrap()
}

/// Let event hops (element/bridge drain, session relay) settle
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// =============================================================================
// Factory selection
// =============================================================================

#[tokio::test]
async fn test_factory_default_selects_adaptive() {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, None, true);

    let intent = PlaybackIntent::new(media_url(1), BackendPreference::Auto);
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "adaptive-manifest");
}

#[tokio::test]
async fn test_factory_falls_through_when_adaptive_declines() {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, None, false);

    let intent = PlaybackIntent::new(media_url(1), BackendPreference::Auto);
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "direct-element");
}

#[tokio::test]
async fn test_factory_native_preference_uses_bridge() {
    let (element, _etx) = StubElement::new();
    let (bridge, _btx) = StubBridge::new();
    let surface = surface(element, Some(bridge), true);

    let intent = PlaybackIntent::new(media_url(1), BackendPreference::NativePipeline);
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "native-pipeline");
}

#[tokio::test]
async fn test_factory_native_preference_without_bridge_falls_back() {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, None, true);

    let intent = PlaybackIntent::new(media_url(1), BackendPreference::NativePipeline);
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "direct-element");
}

#[tokio::test]
async fn test_factory_auto_with_segmented_url_prefers_direct() {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, None, true);

    // No explicit hint, but the source itself is a playlist
    let intent = PlaybackIntent::new(
        Url::parse("https://server.example/videos/1/master.m3u8").unwrap(),
        BackendPreference::Auto,
    )
    .with_mime_type("application/x-mpegURL");
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "direct-element");
}

#[tokio::test]
async fn test_factory_transcoded_prefers_direct() {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, None, true);

    let intent = PlaybackIntent::new(
        Url::parse("https://server.example/videos/1/master.m3u8").unwrap(),
        BackendPreference::ManifestAdaptive,
    )
    .with_mime_type("application/x-mpegURL");
    let adapter = factory().create_player(surface, &intent).await.unwrap();

    assert_eq!(adapter.name(), "direct-element");
}

// =============================================================================
// Session over the native pipeline
// =============================================================================

async fn native_session(
    bridge: Arc<StubBridge>,
) -> (PlaybackSession, tokio::sync::broadcast::Receiver<PlayerEvent>) {
    let (element, _tx) = StubElement::new();
    let surface = surface(element, Some(bridge), true);

    let intent = PlaybackIntent::new(media_url(1), BackendPreference::NativePipeline);
    let adapter = factory().create_player(surface, &intent).await.unwrap();
    let session = PlaybackSession::new(adapter, &PlayerConfig::default());
    let events = session.subscribe();
    session
        .load(&media_url(1), LoadOptions::default())
        .await
        .unwrap();
    (session, events)
}

#[tokio::test]
async fn test_decode_error_triggers_pipeline_reload() {
    let (bridge, tx) = StubBridge::new();
    let (session, _events) = native_session(bridge.clone()).await;

    // Decode error from the service escalates to a session reload
    tx.send(BridgeEvent::Error {
        code: 2,
        message: "decoder wedged".into(),
    })
    .await
    .unwrap();
    settle().await;

    assert_eq!(
        bridge.calls().await,
        vec!["load", "play", "unload", "load", "play"]
    );
    assert!(session.state().await.last_error.is_none());
}

#[tokio::test]
async fn test_unsupported_source_fails_session() {
    let (bridge, tx) = StubBridge::new();
    let (session, mut events) = native_session(bridge.clone()).await;

    tx.send(BridgeEvent::Error {
        code: 3,
        message: "codec not available".into(),
    })
    .await
    .unwrap();
    settle().await;

    // Backend torn down without any recovery reload
    assert_eq!(bridge.calls().await, vec!["load", "play", "unload"]);
    assert_eq!(
        session.state().await.last_error,
        Some(ErrorKind::MediaNotSupported)
    );

    let mut error_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            PlayerEvent::Error {
                kind: ErrorKind::MediaNotSupported,
                ..
            }
        ) {
            error_events += 1;
        }
    }
    assert_eq!(error_events, 1);
}

#[tokio::test]
async fn test_transport_error_does_not_tear_down_session() {
    let (bridge, tx) = StubBridge::new();
    let (session, mut events) = native_session(bridge.clone()).await;

    tx.send(BridgeEvent::Error {
        code: 1,
        message: "segment request failed".into(),
    })
    .await
    .unwrap();
    settle().await;

    assert_eq!(bridge.calls().await, vec!["load", "play"]);
    assert!(session.state().await.last_error.is_none());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, PlayerEvent::Error { .. }));
    }
}

#[tokio::test]
async fn test_session_state_follows_bridge_events() {
    let (bridge, tx) = StubBridge::new();
    let (session, _events) = native_session(bridge).await;

    tx.send(BridgeEvent::SourceInfo {
        duration_ms: 7_200_000,
        audio_tracks: vec![
            AudioTrack {
                id: 0,
                language: "en".into(),
                label: "English".into(),
                codec: None,
                channels: Some(6),
                active: true,
            },
            AudioTrack {
                id: 1,
                language: "fr".into(),
                label: "Français".into(),
                codec: None,
                channels: Some(2),
                active: false,
            },
        ],
        subtitle_tracks: Vec::new(),
    })
    .await
    .unwrap();
    tx.send(BridgeEvent::CurrentTime { position_ms: 90_500 })
        .await
        .unwrap();
    settle().await;

    let state = session.state().await;
    assert_eq!(state.duration, Some(7200.0));
    assert!((state.current_time - 90.5).abs() < f64::EPSILON);
    assert_eq!(session.audio_tracks().await.len(), 2);
}

#[tokio::test]
async fn test_audio_track_selection_round_trip() {
    let (bridge, tx) = StubBridge::new();
    let (session, _events) = native_session(bridge.clone()).await;

    tx.send(BridgeEvent::SourceInfo {
        duration_ms: 60_000,
        audio_tracks: vec![
            AudioTrack {
                id: 0,
                language: "en".into(),
                label: "English".into(),
                codec: None,
                channels: None,
                active: true,
            },
            AudioTrack {
                id: 1,
                language: "fr".into(),
                label: "Français".into(),
                codec: None,
                channels: None,
                active: false,
            },
        ],
        subtitle_tracks: Vec::new(),
    })
    .await
    .unwrap();
    settle().await;

    assert!(session.select_audio_track(1).await);
    settle().await;
    assert_eq!(session.state().await.active_audio_track, Some(1));
    // Pipeline has no in-place switch; selection re-issues the load
    assert_eq!(
        bridge.calls().await,
        vec!["load", "play", "unload", "load", "play"]
    );

    assert!(!session.select_audio_track(9).await);
}

#[tokio::test]
async fn test_session_destroy_is_idempotent() {
    let (bridge, _tx) = StubBridge::new();
    let (session, _events) = native_session(bridge.clone()).await;

    session.destroy().await;
    session.destroy().await;

    assert_eq!(bridge.calls().await, vec!["load", "play", "unload"]);
}
