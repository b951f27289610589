// Rtmpcast Models
// Data structures for the output plugin

mod graph;
mod stream_config;

pub use graph::*;
pub use stream_config::*;

use std::collections::HashMap;

/// Talk metadata supplied by the host at stream-start time.
pub type Metadata = HashMap<String, String>;
