//! Generic decoded value
//!
//! A [`Node`] is what the codec produces from a document and what it consumes when
//! rendering a request body. Maps keep document order; the encoder sorts keys on
//! output.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Key holding the text of an element that also has attributes or children
pub const VALUE_KEY: &str = "value";

/// Prefix marking attribute entries inside a map
pub const ATTR_PREFIX: char = '_';

/// Key under which the encoder accepts a whole attribute map
pub const ATTRS_KEY: &str = "_attrs";

pub type NodeMap = IndexMap<String, Node>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Absent value; never rendered by the encoder
    Null,
    Scalar(String),
    /// Scalar leaf coerced through the datetime table
    Timestamp(DateTime<FixedOffset>),
    Map(NodeMap),
    List(Vec<Node>),
}

impl Node {
    pub fn empty_map() -> Self {
        Node::Map(NodeMap::new())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Node::List(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&NodeMap> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Node::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Look up a key on a map node
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Follow a dotted path through nested maps
    pub fn pointer(&self, path: &str) -> Option<&Node> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.get(segment))
    }

    /// Text form of a scalar or timestamp leaf
    pub fn text(&self) -> Option<String> {
        match self {
            Node::Scalar(text) => Some(text.clone()),
            Node::Timestamp(ts) => Some(format_timestamp(ts)),
            _ => None,
        }
    }

    /// Items of a list, or the node itself as a single item
    ///
    /// Useful for fields that are collections in practice but are not enrolled in
    /// the list table.
    pub fn items(&self) -> Vec<&Node> {
        match self {
            Node::List(items) => items.iter().collect(),
            Node::Null => Vec::new(),
            other => vec![other],
        }
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Scalar(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Scalar(text)
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::List(items)
    }
}

impl From<NodeMap> for Node {
    fn from(map: NodeMap) -> Self {
        Node::Map(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Node)> for Node {
    fn from_iter<I: IntoIterator<Item = (K, Node)>>(iter: I) -> Self {
        Node::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Scalars are string-coerced: numbers and booleans keep their JSON text.
impl From<serde_json::Value> for Node {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Node::Null,
            serde_json::Value::Bool(b) => Node::Scalar(b.to_string()),
            serde_json::Value::Number(n) => Node::Scalar(n.to_string()),
            serde_json::Value::String(s) => Node::Scalar(s),
            serde_json::Value::Array(items) => {
                Node::List(items.into_iter().map(Node::from).collect())
            }
            serde_json::Value::Object(map) => {
                Node::Map(map.into_iter().map(|(k, v)| (k, Node::from(v))).collect())
            }
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_none(),
            Node::Scalar(text) => serializer.serialize_str(text),
            Node::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
            Node::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Node::List(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
        }
    }
}

/// Request payload handed to a service adapter
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Encoded through the codec
    Tree(Node),
    /// Pre-rendered XML inserted verbatim
    Raw(String),
}

impl From<Node> for Payload {
    fn from(node: Node) -> Self {
        Payload::Tree(node)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Payload::Empty,
            other => Payload::Tree(Node::from(other)),
        }
    }
}
