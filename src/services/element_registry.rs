// ElementRegistry Service
// Models the media framework's element factory and tag vocabulary

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::ElementNode;

/// Errors raised while assembling the output pipeline.
///
/// A missing element kind is an environment misconfiguration (the framework
/// install is incomplete), so session start aborts; no partially wired graph
/// is ever returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required element \"{0}\" is not installed")]
    MissingElement(String),
}

/// Metadata tags the FLV muxer recognizes. Tags outside this vocabulary are
/// silently dropped during translation.
const KNOWN_TAGS: &[&str] = &[
    "album",
    "artist",
    "comment",
    "composer",
    "copyright",
    "date",
    "description",
    "encoder",
    "genre",
    "keywords",
    "title",
];

/// The set of installed element kinds and the property vocabulary each one
/// exposes. Stands in for the framework's element factory: `make` is the
/// factory call, `has_property` the property probe the soft-fail quality
/// lookup relies on.
pub struct ElementRegistry {
    elements: BTreeMap<&'static str, &'static [&'static str]>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        let mut elements: BTreeMap<&'static str, &'static [&'static str]> = BTreeMap::new();
        elements.insert("queue", &["max-size-buffers", "leaky"]);
        elements.insert("audioconvert", &[]);
        elements.insert("level", &["interval"]);
        elements.insert("lamemp3enc", &["quality", "bitrate", "target"]);
        elements.insert("faac", &["bitrate", "rate-control"]);
        elements.insert("x264enc", &["bitrate", "tune", "speed-preset", "key-int-max"]);
        elements.insert("flvmux", &["streamable"]);
        elements.insert("rtmpsink", &["location", "sync"]);
        Self { elements }
    }

    /// Registry with only the given kinds installed. Used to exercise the
    /// fatal missing-element path.
    #[cfg(test)]
    pub fn with_elements(kinds: &[&'static str]) -> Self {
        let full = Self::new();
        let elements = full
            .elements
            .into_iter()
            .filter(|(kind, _)| kinds.contains(kind))
            .collect();
        Self { elements }
    }

    /// Instantiate a named element of the given kind.
    pub fn make(&self, kind: &str, name: &str) -> Result<ElementNode, PipelineError> {
        if !self.elements.contains_key(kind) {
            return Err(PipelineError::MissingElement(kind.to_string()));
        }
        Ok(ElementNode::new(kind, name))
    }

    pub fn has_property(&self, kind: &str, property: &str) -> bool {
        self.elements
            .get(kind)
            .map(|props| props.contains(&property))
            .unwrap_or(false)
    }

    pub fn tag_exists(&self, tag: &str) -> bool {
        KNOWN_TAGS.contains(&tag)
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_known_element() {
        let registry = ElementRegistry::new();
        let node = registry.make("flvmux", "muxer").unwrap();
        assert_eq!(node.kind(), "flvmux");
        assert_eq!(node.name(), "muxer");
    }

    #[test]
    fn test_make_missing_element_is_fatal() {
        let registry = ElementRegistry::with_elements(&["queue"]);
        let err = registry.make("x264enc", "videocodec").unwrap_err();
        assert!(matches!(err, PipelineError::MissingElement(ref kind) if kind == "x264enc"));
        assert!(err.to_string().contains("x264enc"));
    }

    #[test]
    fn test_property_vocabulary() {
        let registry = ElementRegistry::new();
        assert!(registry.has_property("lamemp3enc", "quality"));
        assert!(!registry.has_property("faac", "quality"));
        assert!(registry.has_property("x264enc", "tune"));
        assert!(!registry.has_property("nosuch", "quality"));
    }

    #[test]
    fn test_tag_vocabulary() {
        let registry = ElementRegistry::new();
        assert!(registry.tag_exists("title"));
        assert!(registry.tag_exists("artist"));
        assert!(!registry.tag_exists("wibble"));
    }
}
