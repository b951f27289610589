// Rtmpcast Services
// Pipeline assembly, configuration, and platform integration

pub mod config_store;
pub mod element_registry;
pub mod encryption;
pub mod events;
pub mod justin_client;
pub mod oauth1;
pub mod output;
pub mod pipeline_builder;

pub use config_store::ConfigStore;
pub use element_registry::{ElementRegistry, PipelineError};
pub use events::{EventSink, NoopEventSink};
pub use justin_client::{AuthState, JustinApi};
pub use output::{OutputPlugin, RtmpOutput};
pub use pipeline_builder::PipelineBuilder;
