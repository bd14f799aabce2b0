use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::time::{sleep, timeout};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, TransportError};

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// `host:port` of an HTTP proxy
    pub proxy: Option<String>,
    /// Whether TLS certificates are verified
    pub verify_tls: bool,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            user_agent: format!("xmlsvc/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            verify_tls: true,
            pool_max_idle_per_host: 10,
        }
    }
}

impl From<&Config> for HttpClientConfig {
    fn from(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            timeout_seconds: config.network.timeout_seconds,
            user_agent: config
                .network
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            proxy: config.proxy(),
            verify_tls: config.network.verify_tls,
            pool_max_idle_per_host: config
                .dispatch
                .max_concurrency
                .max(defaults.pool_max_idle_per_host),
        }
    }
}

/// Exponential backoff between transport attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.retry_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_retry_delay_ms))
    }

    /// Wait before retry with exponential backoff
    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Fully built request, ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub request_id: Uuid,
}

impl WireRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Raw response as received
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl WireResponse {
    /// Response with the canonical reason phrase for `status`
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown")
            .to_string();

        Self {
            status,
            reason,
            headers: Vec::new(),
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Sends one request and hands back whatever came back
///
/// Implementations report only the absence of a response as an error; any status
/// code is a successful send.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse, TransportError>;
}

/// Transport over a shared reqwest connection pool
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpClientConfig,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.pool_max_idle_per_host);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(format!("http://{proxy}"))?);
        }

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout_seconds.saturating_mul(1000)
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse, TransportError> {
        let started = Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            request_id = %request.request_id,
            method = %request.method,
            url = %request.url,
            "Sending request"
        );

        let response = timeout(self.timeout(), builder.send())
            .await
            .map_err(|_| TransportError::Timeout {
                url: request.url.clone(),
                timeout_ms: self.timeout_ms(),
            })?
            .map_err(|e| TransportError::from_reqwest(&request.url, self.timeout_ms(), &e))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, self.timeout_ms(), &e))?;

        let elapsed = started.elapsed();
        debug!(
            request_id = %request.request_id,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            bytes = body.len(),
            "Received response"
        );

        Ok(WireResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers,
            body: body.to_vec(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_transport_creation() {
        let transport = HttpTransport::new(HttpClientConfig::default());
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_http_transport_with_proxy() {
        let config = HttpClientConfig {
            proxy: Some("127.0.0.1:3128".to_string()),
            verify_tls: false,
            ..Default::default()
        };
        let transport = HttpTransport::new(config).unwrap();
        assert_eq!(transport.config().proxy.as_deref(), Some("127.0.0.1:3128"));
    }

    #[test]
    fn test_config_from_app_config() {
        let mut app = Config::default();
        app.network.timeout_seconds = 5;
        app.network.proxy_host = Some("proxy.local".to_string());
        app.network.user_agent = Some("custom/1.0".to_string());

        let config = HttpClientConfig::from(&app);
        assert_eq!(config.timeout_seconds, 5);
        assert_eq!(config.proxy.as_deref(), Some("proxy.local:80"));
        assert_eq!(config.user_agent, "custom/1.0");
    }

    #[test]
    fn test_default_user_agent() {
        let config = HttpClientConfig::default();
        assert!(config.user_agent.starts_with("xmlsvc/"));
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 10000,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(10000));
    }

    #[tokio::test]
    async fn test_wait_honours_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            retry_delay_ms: 20,
            max_retry_delay_ms: 100,
        };

        let start = Instant::now();
        policy.wait(0).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wire_response_reason_and_headers() {
        let mut response = WireResponse::new(500, "oops");
        response
            .headers
            .push(("Content-Type".to_string(), "text/xml".to_string()));

        assert_eq!(response.reason, "Internal Server Error");
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(WireResponse::new(299, "").reason, "Unknown");
    }

    #[tokio::test]
    async fn test_mock_transport_contract() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|request| request.url.ends_with("/ws"))
            .times(1)
            .returning(|_| Ok(WireResponse::new(200, "<r/>")));

        let request = WireRequest {
            method: Method::POST,
            url: "http://localhost/ws".to_string(),
            headers: Vec::new(),
            body: String::new(),
            request_id: Uuid::new_v4(),
        };

        let response = transport.send(&request).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
