use std::time::Duration;

use crate::node::Node;
use crate::transport::{find_header, WireResponse};
use crate::view::{unwrap_root, View};

/// Decoded response of one exchange
///
/// `document` is the whole decoded body; `dict` is the part under the verb's
/// response root (or the whole document when there is none); `view` navigates
/// `dict`.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    content: Vec<u8>,
    elapsed: Duration,
    document: Node,
    dict: Node,
    view: View,
}

impl Response {
    pub(crate) fn new(wire: WireResponse, document: Node, verb: &str) -> Self {
        let dict = unwrap_root(&document, Some(verb)).clone();
        let view = View::from_node(&dict);

        Self {
            status: wire.status,
            reason: wire.reason,
            headers: wire.headers,
            content: wire.body,
            elapsed: wire.elapsed,
            document,
            dict,
            view,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Raw body bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Body as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn document(&self) -> &Node {
        &self.document
    }

    pub fn dict(&self) -> &Node {
        &self.dict
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// `dict` rendered as JSON
    pub fn json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.dict)
    }

    pub fn json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.dict)
    }
}
