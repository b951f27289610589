// Rtmpcast
// RTMP streaming output plugin for presentation capture hosts

pub mod models;
pub mod services;

pub use models::{OutputBin, StreamConfig};
pub use services::{OutputPlugin, PipelineError, RtmpOutput};
