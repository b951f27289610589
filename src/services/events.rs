// Event Sink
// Host-facing notifications from the output plugin

use serde::Serialize;
use serde_json::Value;

/// The operator must open this URL to approve the platform authorization
/// request. The host shows it in a modal.
pub const EVENT_AUTH_URL_READY: &str = "output:auth-url-ready";
/// Authorization could not be started; payload carries the error text.
pub const EVENT_AUTH_FAILED: &str = "output:auth-failed";
/// Channel metadata was pushed to the platform.
pub const EVENT_CHANNEL_STATUS_PUSHED: &str = "output:channel-status-pushed";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    if let Ok(value) = serde_json::to_value(payload) {
        sink.emit(event, value);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every emitted event for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<(String, Value)>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &str, payload: Value) {
            if let Ok(mut events) = self.events.lock() {
                events.push((event.to_string(), payload));
            }
        }
    }
}
