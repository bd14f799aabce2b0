use std::sync::Arc;

use reqwest::Method;
use tracing::{error, info, warn};

use crate::codec::XmlCodec;
use crate::config::{Config, ConfigManager};
use crate::dispatcher::{Dispatcher, DispatcherConfig, MAX_ROUNDS};
use crate::error::{Error, FailureKind, Result};
use crate::exchange::Exchange;
use crate::node::Payload;
use crate::response::Response;
use crate::service::{ServiceAdapter, XmlService};
use crate::tables::{DateTimeTable, ListTable};
use crate::transport::{HttpClientConfig, HttpTransport, RetryPolicy, Transport};

/// Entry point for calling one configured service
///
/// A client owns an immutable configuration, the codec built from its tables,
/// the service adapter and one transport whose connection pool is shared by
/// every call and every batch.
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    codec: Arc<XmlCodec>,
    service: Arc<dyn ServiceAdapter>,
    transport: Arc<dyn Transport>,
    method: Method,
    url: String,
    retry: RetryPolicy,
}

impl Client {
    /// Client over HTTP with the config-driven [`XmlService`] adapter
    pub fn new(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(HttpClientConfig::from(&config))?;
        let service = XmlService::from_config(&config);
        Self::with_transport(config, Arc::new(service), Arc::new(transport))
    }

    pub fn with_transport(
        config: Config,
        service: Arc<dyn ServiceAdapter>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        ConfigManager::validate_config(&config)?;

        let method = Method::from_bytes(config.endpoint.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                Error::InvalidRequest(format!("Invalid HTTP method: {}", config.endpoint.method))
            })?;

        let codec = XmlCodec::new(
            ListTable::new(config.codec.list_nodes.iter().cloned()),
            DateTimeTable::new(&config.codec.datetime_nodes),
        );

        let retry = RetryPolicy {
            attempts: MAX_ROUNDS,
            retry_delay_ms: config.network.retry_delay_ms,
            max_retry_delay_ms: config.network.max_retry_delay_ms,
        };

        Ok(Self {
            url: config.endpoint_url(),
            config: Arc::new(config),
            codec: Arc::new(codec),
            service,
            transport,
            method,
            retry,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn codec(&self) -> &XmlCodec {
        &self.codec
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build an exchange for `verb` without sending it
    pub fn prepare(&self, verb: &str, payload: impl Into<Payload>) -> Exchange {
        Exchange::build(
            verb,
            payload.into(),
            self.method.clone(),
            &self.url,
            Arc::clone(&self.codec),
            Arc::clone(&self.service),
        )
    }

    /// Send an exchange, retrying transport failures with backoff
    pub async fn send(&self, exchange: &mut Exchange) {
        let attempts = self.retry.attempts.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                self.retry.wait(attempt - 1).await;
            }

            exchange.begin_attempt();
            match self.transport.send(exchange.request()).await {
                Ok(wire) => {
                    exchange.decode(wire);
                    return;
                }
                Err(err) => {
                    warn!(
                        request_id = %exchange.request().request_id,
                        verb = exchange.verb(),
                        attempt = attempt + 1,
                        error = %err,
                        "Transport failure"
                    );
                    exchange.fail_transport(err);
                }
            }
        }
    }

    /// Call `verb` once and return its response
    ///
    /// Service failures are returned as errors unless `service.errors` is off, in
    /// which case the response is handed back and the errors stay readable on it.
    pub async fn execute(&self, verb: &str, payload: impl Into<Payload>) -> Result<Response> {
        let mut exchange = self.prepare(verb, payload);
        self.send(&mut exchange).await;

        if self.config.service.warnings && !exchange.warnings().is_empty() {
            warn!("{}: {}", verb, exchange.warnings().join("\n"));
        }

        let kind = exchange.failure().map(|failure| failure.kind);
        if kind == Some(FailureKind::Service) {
            if !self.config.service.errors {
                if let Some(response) = exchange.into_response() {
                    return Ok(response);
                }
                return Err(Error::InvalidRequest(format!("{verb}: no response recorded")));
            }
            error!("{}: {}", verb, exchange.errors().join("\n"));
        }

        let response = exchange.into_result()?;
        info!(
            verb,
            status = response.status(),
            elapsed_ms = response.elapsed().as_millis() as u64,
            "Call completed"
        );
        Ok(response)
    }

    /// Dispatcher sharing this client's transport
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.transport),
            DispatcherConfig::from(self.config.as_ref()),
        )
    }
}
