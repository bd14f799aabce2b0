#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use xmlsvc::{
    Client, Config, ErrorStyle, Transport, TransportError, WireRequest, WireResponse, XmlService,
};

/// Header the scripted transport reads to tell calls apart
pub const CALL_HEADER: &str = "X-CALL";

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Refuse,
    Stall(Duration),
}

/// In-memory transport answering from per-verb scripts
///
/// Each verb pops its next scripted reply; once a script runs dry the verb gets a
/// 200 with `<{verb}Response><Ack>Success</Ack></{verb}Response>`.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, verb: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(verb.to_string(), replies.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, verb: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == verb).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse, TransportError> {
        let verb = request.header(CALL_HEADER).unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(verb.clone());

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Status(status, body)) => Ok(WireResponse::new(status, body)),
            Some(Reply::Refuse) => Err(TransportError::Connection {
                url: request.url.clone(),
                details: "connection refused".to_string(),
            }),
            Some(Reply::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(WireResponse::new(200, success_body(&verb)))
            }
            None => Ok(WireResponse::new(200, success_body(&verb))),
        }
    }
}

pub fn success_body(verb: &str) -> String {
    format!("<{verb}Response><Ack>Success</Ack></{verb}Response>")
}

pub fn failure_body(verb: &str, message: &str) -> String {
    format!(
        "<{verb}Response><Ack>Failure</Ack><Errors><ShortMessage>{message}</ShortMessage>\
         <LongMessage>{message}</LongMessage><ErrorCode>10007</ErrorCode>\
         <SeverityCode>Error</SeverityCode><ErrorClassification>RequestError</ErrorClassification>\
         </Errors></{verb}Response>"
    )
}

/// Config with fast retries and a short round deadline
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.endpoint.domain = "api.example.com".to_string();
    config.endpoint.uri = "/ws".to_string();
    config.network.retry_delay_ms = 1;
    config.network.max_retry_delay_ms = 5;
    config.dispatch.max_concurrency = 3;
    config.dispatch.round_timeout_seconds = 1;
    config.service.error_style = ErrorStyle::Ack;
    config
}

pub fn scripted_client(config: Config, transport: Arc<ScriptedTransport>) -> Client {
    let service = XmlService::from_config(&config).with_header(CALL_HEADER, "{verb}");
    Client::with_transport(config, Arc::new(service), transport).unwrap()
}
