// Processing Graph Model
// In-memory description of the output pipeline handed to the media framework

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// A property value assigned to a pipeline element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => {
                if s.chars().any(char::is_whitespace) {
                    write!(f, "\"{s}\"")
                } else {
                    write!(f, "{s}")
                }
            }
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A named processing element inside the output bin.
#[derive(Debug, Clone, Serialize)]
pub struct ElementNode {
    kind: String,
    name: String,
    properties: Vec<(String, PropertyValue)>,
}

impl ElementNode {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            properties: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign a property, replacing any earlier assignment of the same name.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) {
        if let Some(entry) = self.properties.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.properties.push((name.to_string(), value));
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }
}

/// Externally visible input port bound to the first node of a chain,
/// so the surrounding capture pipeline can attach without seeing the wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GhostPort {
    pub name: String,
    pub target: String,
}

/// How tags on the muxer combine with pre-existing tags of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMergeMode {
    Append,
    /// New tags overwrite pre-existing ones with the same name.
    Replace,
    #[default]
    Keep,
}

/// Directed link between two named elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub src: String,
    pub dst: String,
}

/// The assembled output pipeline: named nodes, directed links, ghost ports
/// and the metadata tag set attached to the muxer. Built fresh for every
/// streaming session and discarded when the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct OutputBin {
    name: String,
    nodes: Vec<ElementNode>,
    links: Vec<Link>,
    ghost_ports: Vec<GhostPort>,
    tags: BTreeMap<String, String>,
    tag_merge_mode: TagMergeMode,
}

impl OutputBin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            links: Vec::new(),
            ghost_ports: Vec::new(),
            tags: BTreeMap::new(),
            tag_merge_mode: TagMergeMode::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, node: ElementNode) {
        debug_assert!(
            self.node(node.name()).is_none(),
            "duplicate element name {}",
            node.name()
        );
        self.nodes.push(node);
    }

    pub fn node(&self, name: &str) -> Option<&ElementNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn nodes(&self) -> &[ElementNode] {
        &self.nodes
    }

    pub fn link(&mut self, src: &str, dst: &str) {
        self.links.push(Link {
            src: src.to_string(),
            dst: dst.to_string(),
        });
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn add_ghost_port(&mut self, name: &str, target: &str) {
        self.ghost_ports.push(GhostPort {
            name: name.to_string(),
            target: target.to_string(),
        });
    }

    pub fn ghost_port(&self, name: &str) -> Option<&GhostPort> {
        self.ghost_ports.iter().find(|p| p.name == name)
    }

    pub fn ghost_ports(&self) -> &[GhostPort] {
        &self.ghost_ports
    }

    pub fn add_tag(&mut self, name: &str, value: &str) {
        self.tags.insert(name.to_string(), value.to_string());
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn set_tag_merge_mode(&mut self, mode: TagMergeMode) {
        self.tag_merge_mode = mode;
    }

    pub fn tag_merge_mode(&self) -> TagMergeMode {
        self.tag_merge_mode
    }

    fn downstream_of(&self, name: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.src == name)
            .map(|l| l.dst.as_str())
    }

    fn indegree(&self, name: &str) -> usize {
        self.links.iter().filter(|l| l.dst == name).count()
    }

    /// Element kinds on the chain starting at the target of `port`,
    /// up to but not including the first merge point (the muxer).
    pub fn chain_kinds(&self, port: &str) -> Vec<String> {
        let mut kinds = Vec::new();
        let Some(port) = self.ghost_port(port) else {
            return kinds;
        };
        let mut current = port.target.as_str();
        loop {
            let Some(node) = self.node(current) else {
                break;
            };
            if self.indegree(current) > 1 {
                break;
            }
            kinds.push(node.kind().to_string());
            match self.downstream_of(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        kinds
    }

    /// Render the textual pipeline description consumed by the media
    /// framework. Linear chains are joined with `!`; chains feeding a merge
    /// point reference it by name.
    pub fn launch_description(&self) -> String {
        let mut segments: Vec<String> = Vec::new();
        let mut visited: Vec<String> = Vec::new();

        let render = |start: &ElementNode, visited: &mut Vec<String>| -> String {
            let mut parts: Vec<String> = Vec::new();
            let mut current = start.name();
            loop {
                let Some(node) = self.node(current) else {
                    break;
                };
                let mut piece = format!("{} name={}", node.kind(), node.name());
                for (prop, value) in node.properties() {
                    piece.push_str(&format!(" {prop}={value}"));
                }
                parts.push(piece);
                visited.push(node.name().to_string());
                match self.downstream_of(current) {
                    Some(next) if self.indegree(next) > 1 => {
                        parts.push(format!("{next}."));
                        break;
                    }
                    Some(next) => current = next,
                    None => break,
                }
            }
            parts.join(" ! ")
        };

        // Chains first (ghost port order), then any remaining roots such as
        // the muxer-to-sink tail.
        for port in &self.ghost_ports {
            if let Some(node) = self.node(&port.target) {
                segments.push(render(node, &mut visited));
            }
        }
        for node in &self.nodes {
            if visited.iter().any(|v| v == node.name()) {
                continue;
            }
            if self.indegree(node.name()) > 1 || self.indegree(node.name()) == 0 {
                segments.push(render(node, &mut visited));
            }
        }

        segments.join("  ")
    }
}
