// PipelineBuilder Service
// Per-session assembly of the FLV/RTMP output graph

use crate::models::{Metadata, OutputBin, PropertyValue, StreamConfig, TagMergeMode, VideoTune};
use crate::services::{ElementRegistry, PipelineError};

/// Level element sampling interval, nanoseconds (20 ms).
const LEVEL_INTERVAL_NS: u64 = 20_000_000;

/// Builds one output bin per streaming session. Holds no state across
/// sessions; the configuration is read once, at build time.
pub struct PipelineBuilder<'a> {
    config: &'a StreamConfig,
    registry: &'a ElementRegistry,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(config: &'a StreamConfig, registry: &'a ElementRegistry) -> Self {
        Self { config, registry }
    }

    /// Assemble the output bin: every enabled media type gets one linear
    /// chain terminating at the shared muxer, which feeds the network sink.
    /// The bin exposes one ghost port per enabled media type ("audiosink" /
    /// "videosink") bound to the head of each chain.
    pub fn build(
        &self,
        audio: bool,
        video: bool,
        metadata: Option<&Metadata>,
    ) -> Result<OutputBin, PipelineError> {
        let mut bin = OutputBin::new("rtmp-output");

        let muxer = self.registry.make("flvmux", "muxer")?;

        // Tag merge mode is always Replace, whether or not metadata was
        // supplied; tags themselves only when the caller provided any.
        bin.set_tag_merge_mode(TagMergeMode::Replace);
        if let Some(metadata) = metadata {
            for (tag, value) in metadata {
                if self.registry.tag_exists(tag) {
                    bin.add_tag(tag, value);
                }
            }
        }
        bin.add_node(muxer);

        let mut sink = self.registry.make("rtmpsink", "rtmpsink")?;
        sink.set_property("location", PropertyValue::Str(self.config.url.clone()));
        bin.add_node(sink);

        if audio {
            self.build_audio_chain(&mut bin)?;
        }
        if video {
            self.build_video_chain(&mut bin)?;
        }

        bin.link("muxer", "rtmpsink");

        log::debug!("assembled output bin: {}", bin.launch_description());

        Ok(bin)
    }

    /// queue -> audioconvert -> level -> codec -> muxer
    fn build_audio_chain(&self, bin: &mut OutputBin) -> Result<(), PipelineError> {
        bin.add_node(self.registry.make("queue", "audioqueue")?);
        bin.add_node(self.registry.make("audioconvert", "audioconvert")?);

        let mut level = self.registry.make("level", "audiolevel")?;
        level.set_property("interval", PropertyValue::UInt(LEVEL_INTERVAL_NS));
        bin.add_node(level);

        let kind = self.config.audio_codec.element_kind();
        let mut codec = self.registry.make(kind, "audiocodec")?;
        if self.registry.has_property(kind, "quality") {
            codec.set_property(
                "quality",
                PropertyValue::Int(i64::from(self.config.audio_quality)),
            );
        } else {
            log::debug!("audio codec {kind} exposes no quality property, using encoder defaults");
        }
        bin.add_node(codec);

        bin.add_ghost_port("audiosink", "audioqueue");

        bin.link("audioqueue", "audioconvert");
        bin.link("audioconvert", "audiolevel");
        bin.link("audiolevel", "audiocodec");
        bin.link("audiocodec", "muxer");
        Ok(())
    }

    /// queue -> x264enc -> muxer
    fn build_video_chain(&self, bin: &mut OutputBin) -> Result<(), PipelineError> {
        bin.add_node(self.registry.make("queue", "videoqueue")?);

        let mut codec = self.registry.make("x264enc", "videocodec")?;
        codec.set_property(
            "bitrate",
            PropertyValue::Int(i64::from(self.config.video_bitrate)),
        );
        if self.config.video_tune != VideoTune::None {
            codec.set_property(
                "tune",
                PropertyValue::Str(self.config.video_tune.as_str().to_string()),
            );
        }
        bin.add_node(codec);

        bin.add_ghost_port("videosink", "videoqueue");

        bin.link("videoqueue", "videocodec");
        bin.link("videocodec", "muxer");
        Ok(())
    }
}
