use std::sync::Arc;

use reqwest::Method;
use tracing::debug;
use uuid::Uuid;

use crate::codec::XmlCodec;
use crate::error::{ExchangeFailure, FailureKind, TransportError};
use crate::node::{Node, Payload};
use crate::response::Response;
use crate::service::ServiceAdapter;
use crate::transport::{WireRequest, WireResponse, REQUEST_ID_HEADER};

/// Where an exchange stands after its latest attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeOutcome {
    /// Built, or reset for another attempt
    #[default]
    Unsent,
    Completed,
    Failed(ExchangeFailure),
}

/// One request/response pair
///
/// Building performs no I/O. The owner sends [`Exchange::request`] through a
/// transport and feeds the result back through [`Exchange::decode`] or
/// [`Exchange::fail_transport`].
#[derive(Debug)]
pub struct Exchange {
    verb: String,
    payload: Payload,
    request: WireRequest,
    codec: Arc<XmlCodec>,
    service: Arc<dyn ServiceAdapter>,
    response: Option<Response>,
    outcome: ExchangeOutcome,
    errors: Vec<String>,
    warnings: Vec<String>,
    codes: Vec<i64>,
    attempts: u32,
}

impl Exchange {
    pub fn build(
        verb: impl Into<String>,
        payload: Payload,
        method: Method,
        url: &str,
        codec: Arc<XmlCodec>,
        service: Arc<dyn ServiceAdapter>,
    ) -> Self {
        let verb = verb.into();
        let request_id = Uuid::new_v4();

        let mut headers = service.request_headers(&verb);
        headers.push((REQUEST_ID_HEADER.to_string(), request_id.to_string()));
        let body = service.request_body(&verb, &payload);

        debug!(
            request_id = %request_id,
            service = service.name(),
            verb = %verb,
            bytes = body.len(),
            "Built request"
        );

        let request = WireRequest {
            method,
            url: url.to_string(),
            headers,
            body,
            request_id,
        };

        Self {
            verb,
            payload,
            request,
            codec,
            service,
            response: None,
            outcome: ExchangeOutcome::Unsent,
            errors: Vec::new(),
            warnings: Vec::new(),
            codes: Vec::new(),
            attempts: 0,
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn request(&self) -> &WireRequest {
        &self.request
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn outcome(&self) -> &ExchangeOutcome {
        &self.outcome
    }

    pub fn failure(&self) -> Option<&ExchangeFailure> {
        match &self.outcome {
            ExchangeOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExchangeOutcome::Completed
    }

    /// True once a response has been received and classified
    pub fn is_decoded(&self) -> bool {
        self.response.is_some()
    }

    pub fn is_transport_failure(&self) -> bool {
        self.failure()
            .is_some_and(|failure| failure.kind == FailureKind::Transport)
    }

    /// Service errors extracted from the body
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn codes(&self) -> &[i64] {
        &self.codes
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a new send; a previous transport failure is forgotten
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        if self.is_transport_failure() {
            self.outcome = ExchangeOutcome::Unsent;
        }
    }

    /// Record that no response arrived
    pub fn fail_transport(&mut self, error: TransportError) {
        if self.is_decoded() {
            return;
        }
        self.fail(FailureKind::Transport, error.to_string(), None);
    }

    /// Classify a received response
    ///
    /// A second call after a response has been decoded changes nothing.
    pub fn decode(&mut self, wire: WireResponse) {
        if self.is_decoded() {
            return;
        }

        let status = wire.status;
        let decoded = self.codec.decode_for(&wire.body, Some(&self.verb));

        debug!(
            request_id = %self.request.request_id,
            verb = %self.verb,
            status,
            elapsed_ms = wire.elapsed.as_millis() as u64,
            "Decoding response"
        );

        if status != 200 {
            let reason = wire.reason.clone();
            // The body is still kept for inspection when it parses
            let document = decoded.unwrap_or_else(|_| Node::empty_map());
            self.response = Some(Response::new(wire, document, &self.verb));
            self.fail(FailureKind::Http, reason, Some(status));
            return;
        }

        let document = match decoded {
            Ok(document) => document,
            Err(error) => {
                self.response = Some(Response::new(wire, Node::empty_map(), &self.verb));
                self.fail(FailureKind::Malformed, error.to_string(), Some(status));
                return;
            }
        };

        let response = Response::new(wire, document, &self.verb);
        let found = self.service.extract_errors(&self.verb, &response);
        self.response = Some(response);
        self.errors = found.errors;
        self.warnings = found.warnings;
        self.codes = found.codes;

        if self.errors.is_empty() {
            self.outcome = ExchangeOutcome::Completed;
        } else {
            let message = self.errors.join("; ");
            self.fail(FailureKind::Service, message, Some(status));
        }
    }

    fn fail(&mut self, kind: FailureKind, message: String, status: Option<u16>) {
        self.outcome = ExchangeOutcome::Failed(ExchangeFailure {
            verb: self.verb.clone(),
            kind,
            message,
            status,
        });
    }

    /// The received response regardless of outcome
    pub fn into_response(self) -> Option<Response> {
        self.response
    }

    /// The response on success, the classified failure otherwise
    pub fn into_result(self) -> Result<Response, ExchangeFailure> {
        match self.outcome {
            ExchangeOutcome::Completed => self.response.ok_or_else(|| ExchangeFailure {
                verb: self.verb.clone(),
                kind: FailureKind::Malformed,
                message: "no response recorded".to_string(),
                status: None,
            }),
            ExchangeOutcome::Failed(failure) => Err(failure),
            ExchangeOutcome::Unsent => Err(ExchangeFailure {
                verb: self.verb,
                kind: FailureKind::Transport,
                message: "request was never sent".to_string(),
                status: None,
            }),
        }
    }
}
