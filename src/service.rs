//! Per-service request construction and error extraction
//!
//! The engine itself knows nothing about any particular service. A
//! [`ServiceAdapter`] supplies the headers and body for a verb and reads
//! service-level failures back out of a decoded response.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::encode;
use crate::config::{Config, CredentialsConfig, VersionsConfig};
use crate::node::Payload;
use crate::response::Response;
use crate::view::View;

const XML_DECLARATION: &str = "<?xml version='1.0' encoding='utf-8'?>";

/// How the request root is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// `<{Verb}Request xmlns="...">...</{Verb}Request>`
    #[default]
    Plain,
    /// The plain request inside a fixed SOAP 1.1 envelope
    Soap,
}

/// Where a service reports failures inside a successful HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStyle {
    /// Never report service failures
    #[default]
    None,
    /// `Ack` plus `Errors` blocks
    Ack,
    /// `ack` plus `errorMessage.error` blocks
    Soa,
}

/// Service-level problems found in a response body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceErrors {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Numeric error codes, without duplicates
    pub codes: Vec<i64>,
}

impl ServiceErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn push_code(&mut self, code: Option<&str>) {
        if let Some(code) = code.and_then(|c| c.trim().parse::<i64>().ok()) {
            if !self.codes.contains(&code) {
                self.codes.push(code);
            }
        }
    }
}

pub trait ServiceAdapter: Send + Sync + fmt::Debug {
    /// Name used in log lines
    fn name(&self) -> &str;

    /// Headers for one request of `verb`
    fn request_headers(&self, verb: &str) -> Vec<(String, String)>;

    /// Complete request body for `verb`
    fn request_body(&self, verb: &str, payload: &Payload) -> String {
        render_envelope(EnvelopeKind::Plain, "", verb, &render_payload(payload))
    }

    /// Service failures reported in `response`
    fn extract_errors(&self, _verb: &str, _response: &Response) -> ServiceErrors {
        ServiceErrors::default()
    }
}

/// Payload as body text: trees go through the encoder, raw text is kept as-is
pub fn render_payload(payload: &Payload) -> String {
    match payload {
        Payload::Empty => String::new(),
        Payload::Tree(node) => encode(node),
        Payload::Raw(xml) => xml.clone(),
    }
}

/// Wrap an encoded body in the request root and, optionally, a SOAP envelope
pub fn render_envelope(kind: EnvelopeKind, namespace: &str, verb: &str, body: &str) -> String {
    let request = if namespace.is_empty() {
        format!("<{verb}Request>{body}</{verb}Request>")
    } else {
        format!("<{verb}Request xmlns=\"{namespace}\">{body}</{verb}Request>")
    };

    match kind {
        EnvelopeKind::Plain => format!("{XML_DECLARATION}{request}"),
        EnvelopeKind::Soap => format!(
            "{XML_DECLARATION}<soapenv:Envelope \
             xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\">\
             <soapenv:Header/><soapenv:Body>{request}</soapenv:Body></soapenv:Envelope>"
        ),
    }
}

/// Adapter driven entirely by configuration
///
/// Header values are templates. The placeholders `{verb}`, `{appid}`, `{devid}`,
/// `{certid}`, `{token}`, `{iaf_token}`, `{siteid}` and `{version}` are substituted
/// per request; a header whose value renders empty is not sent.
#[derive(Debug, Clone)]
pub struct XmlService {
    name: String,
    namespace: String,
    envelope: EnvelopeKind,
    headers: BTreeMap<String, String>,
    credentials: CredentialsConfig,
    versions: VersionsConfig,
    error_style: ErrorStyle,
}

impl XmlService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            envelope: EnvelopeKind::Plain,
            headers: BTreeMap::new(),
            credentials: CredentialsConfig::default(),
            versions: VersionsConfig::default(),
            error_style: ErrorStyle::None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.endpoint.service.clone(),
            namespace: config.endpoint.namespace.clone(),
            envelope: config.endpoint.envelope,
            headers: config.service.headers.clone(),
            credentials: config.credentials.clone(),
            versions: config.versions.clone(),
            error_style: config.service.error_style,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeKind) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.headers.insert(name.into(), template.into());
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsConfig) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_error_style(mut self, error_style: ErrorStyle) -> Self {
        self.error_style = error_style;
        self
    }

    fn render_template(&self, template: &str, verb: &str) -> String {
        let credential = |value: &Option<String>| value.clone().unwrap_or_default();

        template
            .replace("{verb}", verb)
            .replace("{appid}", &credential(&self.credentials.appid))
            .replace("{devid}", &credential(&self.credentials.devid))
            .replace("{certid}", &credential(&self.credentials.certid))
            .replace("{token}", &credential(&self.credentials.token))
            .replace("{iaf_token}", &credential(&self.credentials.iaf_token))
            .replace("{siteid}", &credential(&self.credentials.siteid))
            .replace("{version}", self.versions.for_verb(verb))
    }
}

impl ServiceAdapter for XmlService {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_headers(&self, verb: &str) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(name, template)| (name.clone(), self.render_template(template, verb)))
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();

        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), "text/xml".to_string()));
        }

        headers
    }

    fn request_body(&self, verb: &str, payload: &Payload) -> String {
        render_envelope(self.envelope, &self.namespace, verb, &render_payload(payload))
    }

    fn extract_errors(&self, _verb: &str, response: &Response) -> ServiceErrors {
        match self.error_style {
            ErrorStyle::None => ServiceErrors::default(),
            ErrorStyle::Ack => ack_errors(response.view()),
            ErrorStyle::Soa => soa_errors(response.view()),
        }
    }
}

fn field(view: &View, key: &str) -> String {
    view.get(key).text().unwrap_or_default()
}

/// `Errors` blocks; errors count only when `Ack` is `Failure`
fn ack_errors(view: &View) -> ServiceErrors {
    let mut found = ServiceErrors::default();

    for block in view.get("Errors").iter() {
        let severity = field(block, "SeverityCode");
        let code = block.get("ErrorCode").text();
        found.push_code(code.as_deref());

        let message = format!(
            "Class: {}, Severity: {}, Code: {}, {}{}",
            field(block, "ErrorClassification"),
            severity,
            code.unwrap_or_default(),
            field(block, "ShortMessage"),
            field(block, "LongMessage"),
        );

        if severity == "Warning" {
            found.warnings.push(message);
        } else {
            found.errors.push(message);
        }
    }

    if view.get("Ack").as_str() != Some("Failure") {
        found.errors.clear();
    }
    found
}

/// `errorMessage.error` blocks; errors count unless `ack` is `Success`
fn soa_errors(view: &View) -> ServiceErrors {
    let mut found = ServiceErrors::default();

    for block in view.path("errorMessage.error").iter() {
        let severity = field(block, "severity");
        let code = block.get("errorId").text();
        found.push_code(code.as_deref());

        let message = format!(
            "Domain: {}, Severity: {}, errorId: {}, {}",
            field(block, "domain"),
            severity,
            code.unwrap_or_default(),
            field(block, "message"),
        );

        if severity == "Warning" {
            found.warnings.push(message);
        } else {
            found.errors.push(message);
        }
    }

    if view.get("ack").as_str() == Some("Success") {
        found.errors.clear();
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::XmlCodec;
    use crate::transport::WireResponse;
    use serde_json::json;

    fn response(verb: &str, body: &str) -> Response {
        let wire = WireResponse::new(200, body);
        let document = XmlCodec::default().decode(&wire.body).unwrap();
        Response::new(wire, document, verb)
    }

    #[test]
    fn test_plain_envelope() {
        let service = XmlService::new("trading").with_namespace("urn:ebay:apis:eBLBaseComponents");
        let body = service.request_body(
            "GetUser",
            &Payload::from(json!({"UserID": "u1"})),
        );
        assert_eq!(
            body,
            "<?xml version='1.0' encoding='utf-8'?><GetUserRequest xmlns=\"urn:ebay:apis:eBLBaseComponents\"><UserID>u1</UserID></GetUserRequest>"
        );
    }

    #[test]
    fn test_plain_envelope_without_namespace() {
        let body = render_envelope(EnvelopeKind::Plain, "", "Ping", "");
        assert_eq!(body, "<?xml version='1.0' encoding='utf-8'?><PingRequest></PingRequest>");
    }

    #[test]
    fn test_soap_envelope_round_trips_through_decoder() {
        let service = XmlService::new("soap").with_envelope(EnvelopeKind::Soap);
        let body = service.request_body("findItems", &Payload::Raw("<q>shoe</q>".to_string()));

        assert!(body.contains("<soapenv:Body><findItemsRequest><q>shoe</q></findItemsRequest></soapenv:Body>"));

        let decoded = XmlCodec::default().decode(body.as_bytes()).unwrap();
        let view = View::wrap(&decoded, None);
        assert_eq!(view.path("findItemsRequest.q").as_str(), Some("shoe"));
    }

    #[test]
    fn test_header_templates() {
        let credentials = CredentialsConfig {
            appid: Some("app-1".to_string()),
            siteid: Some("0".to_string()),
            ..Default::default()
        };
        let service = XmlService::new("trading")
            .with_credentials(credentials)
            .with_header("X-API-CALL-NAME", "{verb}")
            .with_header("X-API-APP-NAME", "{appid}")
            .with_header("X-API-SITEID", "{siteid}")
            .with_header("X-API-CERT-NAME", "{certid}")
            .with_header("X-API-VERSION", "{version}");

        let headers = service.request_headers("GetUser");
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(lookup("X-API-CALL-NAME"), Some("GetUser"));
        assert_eq!(lookup("X-API-APP-NAME"), Some("app-1"));
        assert_eq!(lookup("X-API-SITEID"), Some("0"));
        assert_eq!(lookup("X-API-VERSION"), Some("1.0.0"));
        assert_eq!(lookup("X-API-CERT-NAME"), None);
        assert_eq!(lookup("Content-Type"), Some("text/xml"));
    }

    #[test]
    fn test_version_header_follows_operation_overrides() {
        let mut config = crate::config::Config::default();
        config.versions.default = "967".to_string();
        config
            .versions
            .operations
            .insert("GetItem".to_string(), "1085".to_string());
        let service = XmlService::from_config(&config).with_header("X-API-VERSION", "{version}");

        let version = |verb: &str| {
            service
                .request_headers(verb)
                .into_iter()
                .find(|(name, _)| name == "X-API-VERSION")
                .map(|(_, value)| value)
        };
        assert_eq!(version("GetItem").as_deref(), Some("1085"));
        assert_eq!(version("GetUser").as_deref(), Some("967"));
    }

    #[test]
    fn test_ack_errors_reported_on_failure() {
        let body = "<GetUserResponse><Ack>Failure</Ack>\
            <Errors><ShortMessage>Auth token is invalid.</ShortMessage><LongMessage> Validation failed.</LongMessage>\
            <ErrorCode>931</ErrorCode><SeverityCode>Error</SeverityCode><ErrorClassification>RequestError</ErrorClassification></Errors>\
            <Errors><ShortMessage>Deprecated</ShortMessage><ErrorCode>21917</ErrorCode><SeverityCode>Warning</SeverityCode></Errors>\
            </GetUserResponse>";

        let service = XmlService::new("trading").with_error_style(ErrorStyle::Ack);
        let found = service.extract_errors("GetUser", &response("GetUser", body));

        assert_eq!(found.errors.len(), 1);
        assert_eq!(
            found.errors[0],
            "Class: RequestError, Severity: Error, Code: 931, Auth token is invalid.Validation failed."
        );
        assert_eq!(found.warnings.len(), 1);
        assert_eq!(found.codes, vec![931, 21917]);
    }

    #[test]
    fn test_ack_errors_ignored_on_warning_ack() {
        let body = "<GetUserResponse><Ack>Warning</Ack>\
            <Errors><ShortMessage>x</ShortMessage><ErrorCode>1</ErrorCode><SeverityCode>Error</SeverityCode></Errors>\
            </GetUserResponse>";

        let service = XmlService::new("trading").with_error_style(ErrorStyle::Ack);
        let found = service.extract_errors("GetUser", &response("GetUser", body));
        assert!(found.errors.is_empty());
        assert_eq!(found.codes, vec![1]);
    }

    #[test]
    fn test_soa_errors() {
        let body = "<findItemsResponse><ack>Failure</ack><errorMessage><error>\
            <errorId>5014</errorId><domain>CoreRuntime</domain><severity>Error</severity>\
            <message>Operation not supported</message></error></errorMessage></findItemsResponse>";

        let service = XmlService::new("finding").with_error_style(ErrorStyle::Soa);
        let found = service.extract_errors("findItems", &response("findItems", body));

        assert_eq!(
            found.errors,
            vec!["Domain: CoreRuntime, Severity: Error, errorId: 5014, Operation not supported"]
        );
        assert_eq!(found.codes, vec![5014]);
    }

    #[test]
    fn test_soa_errors_suppressed_on_success() {
        let body = "<findItemsResponse><ack>Success</ack><errorMessage><error>\
            <errorId>1</errorId><severity>Error</severity></error></errorMessage></findItemsResponse>";

        let service = XmlService::new("finding").with_error_style(ErrorStyle::Soa);
        let found = service.extract_errors("findItems", &response("findItems", body));
        assert!(found.errors.is_empty());
    }

    #[test]
    fn test_no_error_style() {
        let body = "<r><Ack>Failure</Ack><Errors><ShortMessage>x</ShortMessage></Errors></r>";
        let service = XmlService::new("plain");
        assert!(service.extract_errors("r", &response("r", body)).is_empty());
    }
}
