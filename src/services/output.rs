//! RTMP Output Plugin
//!
//! The host-facing boundary: owns the stream configuration, the per-field
//! settings surface, the platform client lifecycle, and per-session pipeline
//! assembly.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::models::{
    AudioCodec, Metadata, OutputBin, StreamConfig, StreamingDestination, VideoTune,
};
use crate::services::config_store::ConfigStore;
use crate::services::element_registry::{ElementRegistry, PipelineError};
use crate::services::events::{
    emit_event, EventSink, NoopEventSink, EVENT_AUTH_FAILED, EVENT_AUTH_URL_READY,
    EVENT_CHANNEL_STATUS_PUSHED,
};
use crate::services::justin_client::JustinApi;
use crate::services::pipeline_builder::PipelineBuilder;

/// Fixed ingest prefix for justin.tv streams; the stream key is appended.
const JUSTIN_INGEST_URL: &str = "rtmp://live-3c.justin.tv/app/";

/// Metadata keys joined into the channel status line, in this order.
const STATUS_KEYS: &[&str] = &["artist", "title"];

/// Metadata key pushed as the channel description.
const DESCRIPTION_KEY: &str = "comment";

/// An output plugin the capture host can drive: restore persisted settings,
/// then build one output bin per streaming session.
pub trait OutputPlugin {
    fn name(&self) -> &'static str;
    fn load_config(&mut self) -> Result<(), String>;
    fn build_pipeline(
        &mut self,
        audio: bool,
        video: bool,
        metadata: Option<&Metadata>,
    ) -> Result<OutputBin, PipelineError>;
}

pub struct RtmpOutput {
    store: Arc<ConfigStore>,
    config: StreamConfig,
    registry: ElementRegistry,
    // Shared with the authorization worker thread, which installs the
    // client once the request token arrives.
    justin_api: Arc<Mutex<Option<JustinApi>>>,
    events: Arc<dyn EventSink>,
}

impl RtmpOutput {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self::with_events(store, Arc::new(NoopEventSink))
    }

    pub fn with_events(store: Arc<ConfigStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            config: StreamConfig::default(),
            registry: ElementRegistry::new(),
            justin_api: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    // ========================================================================
    // Settings surface: one setter per field, each persisting immediately
    // ========================================================================

    /// Apply one field edit to the in-memory snapshot and, through the
    /// store's atomic update, to the persisted record. Writing only the
    /// touched fields keeps values committed from other threads (the
    /// credential blob in particular) intact.
    fn apply<F: Fn(&mut StreamConfig)>(&mut self, mutate: F) {
        mutate(&mut self.config);
        if let Err(e) = self.store.update(|config| mutate(config)) {
            warn!("Failed to persist stream configuration: {e}");
        }
    }

    pub fn set_url(&mut self, url: &str) {
        self.apply(|config| config.url = url.to_string());
    }

    pub fn set_audio_quality(&mut self, quality: u32) {
        self.apply(|config| config.audio_quality = quality);
    }

    pub fn set_video_bitrate(&mut self, bitrate: u32) {
        self.apply(|config| config.video_bitrate = bitrate);
    }

    pub fn set_video_tune(&mut self, tune: VideoTune) {
        self.apply(|config| config.video_tune = tune);
    }

    pub fn set_audio_codec(&mut self, codec: AudioCodec) {
        self.apply(|config| config.audio_codec = codec);
    }

    pub fn set_push_channel_properties(&mut self, push: bool) {
        self.apply(|config| config.push_channel_properties = push);
    }

    pub fn set_consumer_key(&mut self, key: &str) {
        self.apply(|config| config.consumer_key = key.to_string());
    }

    pub fn set_consumer_secret(&mut self, secret: &str) {
        self.apply(|config| config.consumer_secret = secret.to_string());
    }

    /// The stream key also feeds the ingest URL when a managed destination
    /// is selected.
    pub fn set_streaming_key(&mut self, key: &str) {
        self.apply(|config| {
            config.streaming_key = key.to_string();
            if config.streaming_destination == StreamingDestination::JustinTv {
                config.url = format!("{JUSTIN_INGEST_URL}{key}");
            }
        });
    }

    /// Switching to a managed destination locks in its ingest URL and the
    /// codec its ingest expects.
    pub fn set_streaming_destination(&mut self, destination: StreamingDestination) {
        self.apply(|config| {
            config.streaming_destination = destination;
            if destination == StreamingDestination::JustinTv {
                config.url = format!("{JUSTIN_INGEST_URL}{}", config.streaming_key);
                config.audio_codec = AudioCodec::Lame;
            }
        });
    }

    // ========================================================================
    // Platform authorization
    // ========================================================================

    /// Start the platform authorization handshake. The request-token round
    /// trip runs on a worker thread so the interactive thread never blocks
    /// on the network; the URL the operator must open arrives through the
    /// auth-url event. An error return means the handshake never started.
    pub fn authorize(&mut self) -> Result<(), String> {
        if self.config.consumer_key.is_empty() || self.config.consumer_secret.is_empty() {
            let message = "Consumer key and secret are required before authorizing".to_string();
            emit_event(&*self.events, EVENT_AUTH_FAILED, &message);
            return Err(message);
        }

        let key = self.config.consumer_key.clone();
        let secret = self.config.consumer_secret.clone();
        let store = Arc::clone(&self.store);
        let slot = Arc::clone(&self.justin_api);
        let events = Arc::clone(&self.events);

        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let message = format!("Failed to start async runtime: {e}");
                    warn!("{message}");
                    emit_event(&*events, EVENT_AUTH_FAILED, &message);
                    return;
                }
            };
            match runtime.block_on(JustinApi::begin_authorization(&key, &secret)) {
                Ok((authorize_url, api)) => {
                    wire_save_callback(&store, &api);
                    if let Ok(mut slot) = slot.lock() {
                        *slot = Some(api);
                    }
                    emit_event(&*events, EVENT_AUTH_URL_READY, &authorize_url);
                    info!("Platform authorization started, awaiting operator approval");
                }
                Err(e) => {
                    warn!("{e}");
                    emit_event(&*events, EVENT_AUTH_FAILED, &e);
                }
            }
        });

        Ok(())
    }

    fn dispatch_channel_status_push(&self, metadata: Option<&Metadata>) {
        let api = match self.justin_api.lock().ok().and_then(|slot| slot.clone()) {
            Some(api) => api,
            None => {
                warn!("Channel status push skipped: platform client not authorized");
                return;
            }
        };

        let status = talk_status(metadata);
        let description = talk_description(metadata);
        let events = Arc::clone(&self.events);

        // Pushed off the session-start path so a slow or dead platform API
        // never delays the stream.
        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Failed to start channel status push runtime: {e}");
                    return;
                }
            };
            let pushed = runtime.block_on(api.push_channel_status(&status, &description));
            if pushed.is_some() {
                emit_event(&*events, EVENT_CHANNEL_STATUS_PUSHED, &status);
            }
        });
    }
}

impl OutputPlugin for RtmpOutput {
    fn name(&self) -> &'static str {
        "RTMP Streaming"
    }

    /// Restore the persisted configuration and, when stored credentials
    /// exist, the platform client with them.
    fn load_config(&mut self) -> Result<(), String> {
        self.config = self.store.load()?;

        if !self.config.justin_credentials.is_empty() {
            match JustinApi::from_blob(&self.config.justin_credentials) {
                Ok(api) => {
                    wire_save_callback(&self.store, &api);
                    if let Ok(mut slot) = self.justin_api.lock() {
                        *slot = Some(api);
                    }
                }
                Err(e) => warn!("Stored platform credentials unusable: {e}"),
            }
        }

        Ok(())
    }

    fn build_pipeline(
        &mut self,
        audio: bool,
        video: bool,
        metadata: Option<&Metadata>,
    ) -> Result<OutputBin, PipelineError> {
        let bin = PipelineBuilder::new(&self.config, &self.registry).build(audio, video, metadata)?;

        if should_push_channel_status(&self.config, metadata) {
            self.dispatch_channel_status_push(metadata);
        }

        Ok(bin)
    }
}

/// Channel status line: the non-empty status metadata values joined with
/// " - ". Missing metadata yields an empty status.
pub fn talk_status(metadata: Option<&Metadata>) -> String {
    let Some(metadata) = metadata else {
        return String::new();
    };
    STATUS_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .filter(|value| !value.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" - ")
}

pub fn talk_description(metadata: Option<&Metadata>) -> String {
    metadata
        .and_then(|m| m.get(DESCRIPTION_KEY))
        .cloned()
        .unwrap_or_default()
}

/// Channel metadata goes out only for the managed destination, only when
/// the operator opted in, and only when the host supplied any metadata.
pub fn should_push_channel_status(config: &StreamConfig, metadata: Option<&Metadata>) -> bool {
    config.streaming_destination == StreamingDestination::JustinTv
        && config.push_channel_properties
        && metadata.is_some()
}

/// Every credential change the client makes lands back in the configuration
/// record, so restarts resume where the handshake left off.
fn wire_save_callback(store: &Arc<ConfigStore>, api: &JustinApi) {
    let store = Arc::clone(store);
    api.set_save_callback(move |blob| {
        let blob = blob.to_string();
        if let Err(e) = store.update(|config| config.justin_credentials = blob) {
            warn!("Failed to persist platform credentials: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::testing::RecordingSink;
    use tempfile::tempdir;

    fn test_output(dir: &std::path::Path) -> RtmpOutput {
        RtmpOutput::new(Arc::new(ConfigStore::new(dir.to_path_buf())))
    }

    #[test]
    fn test_talk_status_joins_nonempty_values() {
        let metadata = Metadata::from([
            ("artist".to_string(), "Ada Lovelace".to_string()),
            ("title".to_string(), "On Engines".to_string()),
        ]);
        assert_eq!(talk_status(Some(&metadata)), "Ada Lovelace - On Engines");

        let metadata = Metadata::from([("title".to_string(), "On Engines".to_string())]);
        assert_eq!(talk_status(Some(&metadata)), "On Engines");

        let metadata = Metadata::from([
            ("artist".to_string(), "".to_string()),
            ("title".to_string(), "On Engines".to_string()),
        ]);
        assert_eq!(talk_status(Some(&metadata)), "On Engines");

        assert_eq!(talk_status(None), "");
    }

    #[test]
    fn test_talk_description_from_comment_key() {
        let metadata = Metadata::from([("comment".to_string(), "Room 2 recording".to_string())]);
        assert_eq!(talk_description(Some(&metadata)), "Room 2 recording");
        assert_eq!(talk_description(None), "");
    }

    #[test]
    fn test_should_push_requires_destination_flag_and_metadata() {
        let metadata = Metadata::from([("title".to_string(), "T".to_string())]);

        let mut config = StreamConfig::default();
        config.streaming_destination = StreamingDestination::JustinTv;
        config.push_channel_properties = true;
        assert!(should_push_channel_status(&config, Some(&metadata)));
        assert!(!should_push_channel_status(&config, None));

        config.push_channel_properties = false;
        assert!(!should_push_channel_status(&config, Some(&metadata)));

        config.push_channel_properties = true;
        config.streaming_destination = StreamingDestination::Custom;
        assert!(!should_push_channel_status(&config, Some(&metadata)));
    }

    #[test]
    fn test_setters_persist_immediately() {
        let dir = tempdir().unwrap();
        let mut output = test_output(dir.path());
        output.load_config().unwrap();

        output.set_video_bitrate(5000);
        output.set_url("rtmp://elsewhere.example.com/live");

        let store = ConfigStore::new(dir.path().to_path_buf());
        let on_disk = store.load().unwrap();
        assert_eq!(on_disk.video_bitrate, 5000);
        assert_eq!(on_disk.url, "rtmp://elsewhere.example.com/live");
    }

    #[test]
    fn test_managed_destination_applies_presets() {
        let dir = tempdir().unwrap();
        let mut output = test_output(dir.path());
        output.load_config().unwrap();

        output.set_audio_codec(AudioCodec::Faac);
        output.set_streaming_key("sekrit");
        output.set_streaming_destination(StreamingDestination::JustinTv);

        assert_eq!(output.config().url, "rtmp://live-3c.justin.tv/app/sekrit");
        assert_eq!(output.config().audio_codec, AudioCodec::Lame);

        // Changing the key re-derives the URL while the destination holds
        output.set_streaming_key("newkey");
        assert_eq!(output.config().url, "rtmp://live-3c.justin.tv/app/newkey");
    }

    #[test]
    fn test_custom_destination_leaves_url_alone() {
        let dir = tempdir().unwrap();
        let mut output = test_output(dir.path());
        output.load_config().unwrap();

        output.set_url("rtmp://mine.example.com/live");
        output.set_streaming_key("sekrit");
        assert_eq!(output.config().url, "rtmp://mine.example.com/live");
    }

    #[test]
    fn test_authorize_without_credentials_fails_with_event() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf()));
        let mut output = RtmpOutput::with_events(store, Arc::clone(&sink) as Arc<dyn EventSink>);
        output.load_config().unwrap();

        assert!(output.authorize().is_err());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EVENT_AUTH_FAILED);
    }

    #[test]
    fn test_build_pipeline_for_custom_destination() {
        let dir = tempdir().unwrap();
        let mut output = test_output(dir.path());
        output.load_config().unwrap();
        output.set_url("rtmp://mine.example.com/live");

        let metadata = Metadata::from([("title".to_string(), "T".to_string())]);
        let bin = output.build_pipeline(true, true, Some(&metadata)).unwrap();
        assert!(bin.ghost_port("audiosink").is_some());
        assert!(bin.ghost_port("videosink").is_some());
        // Custom destination: no platform dispatch happens (no client exists)
        assert!(output.justin_api.lock().unwrap().is_none());
    }

    #[test]
    fn test_authorize_returns_before_handshake_completes() {
        let dir = tempdir().unwrap();
        let mut output = test_output(dir.path());
        output.load_config().unwrap();
        output.set_consumer_key("ck");
        output.set_consumer_secret("cs");
        // The request-token round trip runs on a worker thread; the call
        // itself only validates credentials and dispatches.
        assert!(output.authorize().is_ok());
        assert!(output.justin_api.lock().unwrap().is_none());
    }

    #[test]
    fn test_plugin_name() {
        let dir = tempdir().unwrap();
        assert_eq!(test_output(dir.path()).name(), "RTMP Streaming");
    }
}
