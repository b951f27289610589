// Stream Configuration Model
// Flat record backing the RTMP output settings panel

use serde::{Deserialize, Serialize};

fn default_audio_quality() -> u32 {
    3
}

fn default_video_bitrate() -> u32 {
    2400
}

/// x264 tuning preset. `None` is a sentinel: the tune property is omitted
/// from the encoder entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoTune {
    #[default]
    None,
    Film,
    Animation,
    Grain,
    Stillimage,
    Psnr,
    Ssim,
    Fastdecode,
    Zerolatency,
}

impl VideoTune {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoTune::None => "none",
            VideoTune::Film => "film",
            VideoTune::Animation => "animation",
            VideoTune::Grain => "grain",
            VideoTune::Stillimage => "stillimage",
            VideoTune::Psnr => "psnr",
            VideoTune::Ssim => "ssim",
            VideoTune::Fastdecode => "fastdecode",
            VideoTune::Zerolatency => "zerolatency",
        }
    }
}

/// Supported audio encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Lame,
    Faac,
}

impl AudioCodec {
    /// Factory element kind implementing this codec.
    pub fn element_kind(&self) -> &'static str {
        match self {
            AudioCodec::Lame => "lamemp3enc",
            AudioCodec::Faac => "faac",
        }
    }
}

/// Where the stream goes: an arbitrary RTMP endpoint or the named platform
/// with its ingest presets and channel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamingDestination {
    #[default]
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "justin.tv")]
    JustinTv,
}

/// The "push channel properties" flag is persisted as the strings
/// "yes"/"no", matching the record shape older installs carry.
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "yes" } else { "no" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(value == "yes")
    }
}

/// RTMP output settings. A single flat record, mutated field-by-field from
/// the settings panel and read once at pipeline-build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// RTMP destination; validated by the network sink, not by this crate.
    #[serde(default)]
    pub url: String,

    /// Audio encoder quality, 0-9.
    #[serde(default = "default_audio_quality")]
    pub audio_quality: u32,

    /// Video bitrate in kb/s.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,

    #[serde(default)]
    pub video_tune: VideoTune,

    #[serde(default)]
    pub audio_codec: AudioCodec,

    #[serde(default)]
    pub streaming_destination: StreamingDestination,

    #[serde(default)]
    pub streaming_key: String,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    /// Whether to push channel title/description to the platform API.
    #[serde(default, with = "yes_no")]
    pub push_channel_properties: bool,

    /// Opaque serialized platform credential state (owned by the platform
    /// client; written back through its save callback).
    #[serde(default)]
    pub justin_credentials: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            audio_quality: default_audio_quality(),
            video_bitrate: default_video_bitrate(),
            video_tune: VideoTune::default(),
            audio_codec: AudioCodec::default(),
            streaming_destination: StreamingDestination::default(),
            streaming_key: String::new(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            push_channel_properties: false,
            justin_credentials: String::new(),
        }
    }
}
