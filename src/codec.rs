//! XML ⇄ [`Node`] codec
//!
//! Decoding happens in two passes. The event reader first builds a plain element
//! tree with namespace prefixes stripped, then the tree is converted depth-first
//! into nodes, consulting the list and datetime tables on the way back up.
//!
//! The conversion is lossy on purpose: comments, processing instructions and the
//! relative position of text among child elements are discarded. An element's own
//! text is stored under `value` and replaces a child element named `value`, so
//! `<r>t<value>x</value></r>` decodes to `{r: {value: "t"}}`.
//!
//! Documents nested deeper than [`MAX_DEPTH`] are rejected before any tree is
//! built.

use quick_xml::events::{BytesStart, Event};
use quick_xml::escape::escape;
use quick_xml::Reader;

use crate::error::CodecError;
use crate::node::{ATTR_PREFIX, ATTRS_KEY, Node, NodeMap, VALUE_KEY};
use crate::tables::{DateTimeTable, ListTable};

/// Deepest element nesting accepted by the decoder
pub const MAX_DEPTH: usize = 1024;

/// Element as read off the wire, before any table is applied
#[derive(Debug, Default)]
struct RawElement {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<RawElement>,
}

/// Stateless decoder configured with the service's lookup tables
#[derive(Debug, Clone, Default)]
pub struct XmlCodec {
    list_table: ListTable,
    datetime_table: DateTimeTable,
}

impl XmlCodec {
    pub fn new(list_table: ListTable, datetime_table: DateTimeTable) -> Self {
        Self {
            list_table,
            datetime_table,
        }
    }

    /// Decode a document into `{rootTag: value}`
    pub fn decode(&self, bytes: &[u8]) -> Result<Node, CodecError> {
        self.decode_for(bytes, None)
    }

    /// Decode a document, resolving verb-relative list-table entries
    pub fn decode_for(&self, bytes: &[u8], verb: Option<&str>) -> Result<Node, CodecError> {
        let Some(root) = read_tree(bytes)? else {
            return Ok(Node::empty_map());
        };

        let name = root.name.clone();
        let value = self.convert(root, &name, verb);

        let mut map = NodeMap::with_capacity(1);
        map.insert(name, value);
        Ok(Node::Map(map))
    }

    fn convert(&self, element: RawElement, path: &str, verb: Option<&str>) -> Node {
        let RawElement {
            name,
            attrs,
            text,
            children,
        } = element;
        let text = text.trim();

        if children.is_empty() && attrs.is_empty() {
            return match self.datetime_table.coerce(&name, text) {
                Some(ts) => Node::Timestamp(ts),
                None => Node::Scalar(text.to_string()),
            };
        }

        let mut map = NodeMap::new();
        for (key, value) in attrs {
            map.insert(format!("{ATTR_PREFIX}{key}"), Node::Scalar(value));
        }

        let mut grouped = NodeMap::new();
        for child in children {
            let child_path = format!("{path}.{}", child.name);
            let tag = child.name.clone();
            let node = self.convert(child, &child_path, verb);

            match grouped.get_mut(&tag) {
                None => {
                    grouped.insert(tag, node);
                }
                Some(Node::List(items)) => items.push(node),
                Some(existing) => {
                    let first = std::mem::replace(existing, Node::Null);
                    *existing = Node::List(vec![first, node]);
                }
            }
        }

        for (tag, node) in grouped.iter_mut() {
            if !node.is_list() && self.list_table.contains(&format!("{path}.{tag}"), verb) {
                let single = std::mem::replace(node, Node::Null);
                *node = Node::List(vec![single]);
            }
        }
        map.extend(grouped);

        if !text.is_empty() {
            map.insert(VALUE_KEY.to_string(), Node::Scalar(text.to_string()));
        }

        Node::Map(map)
    }
}

fn position(reader: &Reader<&[u8]>) -> u64 {
    reader.buffer_position() as u64
}

fn open_element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<RawElement, CodecError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|e| CodecError::malformed(position(reader), e.to_string()))?;

        if attr.key.as_namespace_binding().is_some() {
            continue;
        }

        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| CodecError::malformed(position(reader), e.to_string()))?;
        attrs.push((key, value.into_owned()));
    }

    Ok(RawElement {
        name,
        attrs,
        ..RawElement::default()
    })
}

/// Read the whole document; `None` when it holds no element at all
fn read_tree(bytes: &[u8]) -> Result<Option<RawElement>, CodecError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<RawElement> = Vec::new();
    let mut root: Option<RawElement> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| CodecError::malformed(position(&reader), e.to_string()))?;

        let closed = match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(CodecError::malformed(
                        position(&reader),
                        "multiple root elements",
                    ));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(CodecError::malformed(
                        position(&reader),
                        format!("elements nested deeper than {MAX_DEPTH} levels"),
                    ));
                }
                stack.push(open_element(&reader, &start)?);
                None
            }
            Event::Empty(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(CodecError::malformed(
                        position(&reader),
                        "multiple root elements",
                    ));
                }
                Some(open_element(&reader, &start)?)
            }
            Event::End(_) => match stack.pop() {
                Some(element) => Some(element),
                None => {
                    return Err(CodecError::malformed(
                        position(&reader),
                        "end tag without a matching start tag",
                    ));
                }
            },
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| CodecError::malformed(position(&reader), e.to_string()))?;
                append_text(&reader, &mut stack, &text)?;
                None
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&reader, &mut stack, &text)?;
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(element) = closed {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None => root = Some(element),
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(CodecError::malformed(
            position(&reader),
            format!("unexpected end of document inside <{}>", open.name),
        ));
    }

    Ok(root)
}

fn append_text(
    reader: &Reader<&[u8]>,
    stack: &mut [RawElement],
    text: &str,
) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(element) => {
            element.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(CodecError::malformed(
            position(reader),
            "text outside the root element",
        )),
    }
}

/// Render a node as a request body fragment
///
/// A top-level map becomes one element per key; its `value` entry, if any, is
/// written as leading text. Attribute keys have no element to attach to at this
/// level and are skipped.
pub fn encode(node: &Node) -> String {
    let mut out = String::new();
    match node {
        Node::Null => {}
        Node::Scalar(_) | Node::Timestamp(_) => {
            if let Some(text) = node.text() {
                out.push_str(&escape(text.as_str()));
            }
        }
        Node::List(items) => {
            for item in items {
                out.push_str(&encode(item));
            }
        }
        Node::Map(map) => {
            if let Some(text) = map.get(VALUE_KEY).and_then(Node::text) {
                out.push_str(&escape(text.as_str()));
            }
            for (key, child) in sorted_children(map) {
                encode_element(key, child, &mut out);
            }
        }
    }
    out
}

/// Append `<tag ...>...</tag>` for `node` to `out`
pub fn encode_element(tag: &str, node: &Node, out: &mut String) {
    match node {
        Node::Null => {}
        Node::List(items) => {
            for item in items {
                encode_element(tag, item, out);
            }
        }
        Node::Scalar(_) | Node::Timestamp(_) => {
            let text = node.text().unwrap_or_default();
            out.push('<');
            out.push_str(tag);
            out.push('>');
            out.push_str(&escape(text.as_str()));
            close_tag(tag, out);
        }
        Node::Map(map) => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes(map) {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape(value.as_str()));
                out.push('"');
            }
            out.push('>');

            if let Some(text) = map.get(VALUE_KEY).and_then(Node::text) {
                out.push_str(&escape(text.as_str()));
            }
            for (key, child) in sorted_children(map) {
                encode_element(key, child, out);
            }
            close_tag(tag, out);
        }
    }
}

fn close_tag(tag: &str, out: &mut String) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Attributes from `_name` scalar keys and the `_attrs` map, sorted by name
fn attributes(map: &NodeMap) -> Vec<(&str, String)> {
    let mut attrs: Vec<(&str, String)> = Vec::new();

    for (key, value) in map {
        if key == ATTRS_KEY {
            if let Some(inner) = value.as_map() {
                attrs.extend(
                    inner
                        .iter()
                        .filter_map(|(name, v)| v.text().map(|text| (name.as_str(), text))),
                );
            }
        } else if let Some(name) = key.strip_prefix(ATTR_PREFIX) {
            if let Some(text) = value.text() {
                attrs.push((name, text));
            }
        }
    }

    attrs.sort_by(|a, b| a.0.cmp(b.0));
    attrs.dedup_by(|a, b| a.0 == b.0);
    attrs
}

fn sorted_children(map: &NodeMap) -> Vec<(&str, &Node)> {
    let mut children: Vec<(&str, &Node)> = map
        .iter()
        .filter(|(key, _)| key.as_str() != VALUE_KEY && !key.starts_with(ATTR_PREFIX))
        .map(|(key, value)| (key.as_str(), value))
        .collect();
    children.sort_by(|a, b| a.0.cmp(b.0));
    children
}
