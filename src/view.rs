//! Read-only navigation over a decoded document
//!
//! A [`View`] is built once from a [`Node`] and never changes. Probing for a key
//! that is not there yields [`View::Missing`]; only the `require*` accessors fail.

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;

use crate::error::ViewError;
use crate::node::{format_timestamp, Node, VALUE_KEY};

static MISSING: View = View::Missing;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum View {
    #[default]
    Missing,
    Scalar(String),
    Timestamp(DateTime<FixedOffset>),
    Object(IndexMap<String, View>),
    Array(Vec<View>),
}

impl View {
    /// Build a view over `node` as-is
    pub fn from_node(node: &Node) -> Self {
        match node {
            Node::Null => View::Missing,
            Node::Scalar(text) => View::Scalar(text.clone()),
            Node::Timestamp(ts) => View::Timestamp(*ts),
            Node::List(items) => View::Array(items.iter().map(View::from_node).collect()),
            Node::Map(map) => {
                // `value`-only maps read as their scalar
                if map.len() == 1 {
                    if let Some(value) = map.get(VALUE_KEY) {
                        return View::from_node(value);
                    }
                }
                View::Object(
                    map.iter()
                        .map(|(key, value)| (key.clone(), View::from_node(value)))
                        .collect(),
                )
            }
        }
    }

    /// Build a view over the part of `node` addressed by `hint`
    ///
    /// See [`unwrap_root`].
    pub fn wrap(node: &Node, hint: Option<&str>) -> Self {
        View::from_node(unwrap_root(node, hint))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, View::Missing)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, View::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, View::Array(_))
    }

    /// Child under `key`, or [`View::Missing`]
    pub fn get(&self, key: &str) -> &View {
        match self {
            View::Object(map) => map.get(key).unwrap_or(&MISSING),
            _ => &MISSING,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        !self.get(key).is_missing()
    }

    pub fn require(&self, key: &str) -> Result<&View, ViewError> {
        match self.get(key) {
            View::Missing => Err(ViewError::FieldNotFound {
                path: key.to_string(),
            }),
            found => Ok(found),
        }
    }

    /// Follow a dotted path such as `searchResult.item`
    ///
    /// Numeric segments index into arrays.
    pub fn path(&self, dotted: &str) -> &View {
        dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .fold(self, |view, segment| match view {
                View::Array(_) => match segment.parse::<usize>() {
                    Ok(index) => view.at(index),
                    Err(_) => &MISSING,
                },
                _ => view.get(segment),
            })
    }

    pub fn require_path(&self, dotted: &str) -> Result<&View, ViewError> {
        match self.path(dotted) {
            View::Missing => Err(ViewError::FieldNotFound {
                path: dotted.to_string(),
            }),
            found => Ok(found),
        }
    }

    /// Array element, or [`View::Missing`] when out of range or not an array
    pub fn at(&self, index: usize) -> &View {
        match self {
            View::Array(items) => items.get(index).unwrap_or(&MISSING),
            _ => &MISSING,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            View::Scalar(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            View::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    /// Text of a scalar or timestamp
    pub fn text(&self) -> Option<String> {
        match self {
            View::Scalar(text) => Some(text.clone()),
            View::Timestamp(ts) => Some(format_timestamp(ts)),
            _ => None,
        }
    }

    /// Text under `key`, falling back to `default`
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).text().unwrap_or_else(|| default.to_string())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let map = match self {
            View::Object(map) => Some(map),
            _ => None,
        };
        map.into_iter().flat_map(|map| map.keys().map(String::as_str))
    }

    /// Items of an array; any other present value iterates as itself
    pub fn iter(&self) -> std::slice::Iter<'_, View> {
        match self {
            View::Array(items) => items.iter(),
            View::Missing => Default::default(),
            other => std::slice::from_ref(other).iter(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            View::Missing => 0,
            View::Array(items) => items.len(),
            View::Object(map) => map.len(),
            View::Scalar(_) | View::Timestamp(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locate the operation's own subtree inside a decoded document
///
/// A SOAP `Envelope/Body` wrapper is stripped first. Then, if `{hint}Response` or
/// `hint` is a key of the remaining map, its value is returned; otherwise the map
/// itself is.
pub fn unwrap_root<'a>(node: &'a Node, hint: Option<&str>) -> &'a Node {
    let node = strip_envelope(node);

    let Some(hint) = hint else {
        return node;
    };

    node.get(&format!("{hint}Response"))
        .or_else(|| node.get(hint))
        .unwrap_or(node)
}

fn strip_envelope(node: &Node) -> &Node {
    match node.get("Envelope").and_then(|envelope| envelope.get("Body")) {
        Some(body) if body.as_map().is_some() => body,
        _ => node,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_only_map_reads_as_scalar() {
        let node = Node::from(json!({"price": {"value": "10.5"}}));
        let view = View::from_node(&node);
        assert_eq!(view.get("price").as_str(), Some("10.5"));
    }

    #[test]
    fn test_map_with_attributes_stays_object() {
        let node = Node::from(json!({"price": {"_currency": "USD", "value": "10.5"}}));
        let view = View::from_node(&node);
        let price = view.get("price");
        assert!(price.is_object());
        assert_eq!(price.get_or("value", ""), "10.5");
        assert_eq!(price.get_or("_currency", ""), "USD");
    }

    #[test]
    fn test_missing_lookup_never_fails() {
        let view = View::from_node(&Node::from(json!({"a": {"b": "c"}})));
        assert!(view.get("nope").is_missing());
        assert!(view.get("nope").get("deeper").is_missing());
        assert!(!view.has("nope"));
        assert_eq!(view.get_or("nope", "fallback"), "fallback");
        assert_eq!(view.path("a.b").as_str(), Some("c"));
    }

    #[test]
    fn test_require_raises_field_not_found() {
        let view = View::from_node(&Node::from(json!({"a": {"b": "c"}})));
        assert!(view.require("a").is_ok());

        match view.require_path("a.x") {
            Err(ViewError::FieldNotFound { path }) => assert_eq!(path, "a.x"),
            other => panic!("Expected FieldNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_arrays_and_indexing() {
        let view = View::from_node(&Node::from(json!({"item": [{"id": "1"}, {"id": "2"}]})));
        let items = view.get("item");
        assert!(items.is_array());
        assert_eq!(items.len(), 2);
        assert_eq!(view.path("item.1.id").as_str(), Some("2"));
        assert!(items.at(5).is_missing());

        let ids: Vec<String> = items.iter().map(|item| item.get_or("id", "")).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_iter_single_value() {
        let view = View::from_node(&Node::from(json!({"item": {"id": "1"}})));
        assert_eq!(view.get("item").iter().count(), 1);
        assert_eq!(view.get("missing").iter().count(), 0);
    }

    #[test]
    fn test_wrap_uses_response_hint() {
        let node = Node::from(json!({"findItemsResponse": {"ack": "Success"}}));

        let view = View::wrap(&node, Some("findItems"));
        assert_eq!(view.get("ack").as_str(), Some("Success"));

        let raw = View::wrap(&node, Some("getItem"));
        assert!(raw.has("findItemsResponse"));

        let unhinted = View::wrap(&node, None);
        assert!(unhinted.has("findItemsResponse"));
    }

    #[test]
    fn test_wrap_hint_without_suffix() {
        let node = Node::from(json!({"GetUser": {"UserID": "u1"}}));
        let view = View::wrap(&node, Some("GetUser"));
        assert_eq!(view.get("UserID").as_str(), Some("u1"));
    }

    #[test]
    fn test_wrap_strips_soap_envelope() {
        let node = Node::from(json!({
            "Envelope": {"Header": "", "Body": {"findItemsResponse": {"ack": "Success"}}}
        }));
        let view = View::wrap(&node, Some("findItems"));
        assert_eq!(view.get("ack").as_str(), Some("Success"));
    }
}
