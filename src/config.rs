use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::service::{EnvelopeKind, ErrorStyle};

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlParsing(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Per-client configuration, immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub credentials: CredentialsConfig,
    pub versions: VersionsConfig,
    pub network: NetworkConfig,
    pub dispatch: DispatchConfig,
    pub codec: CodecConfig,
    pub service: ServiceConfig,
}

/// Where requests go and how they are wrapped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub domain: String,
    pub uri: String,
    pub https: bool,
    /// HTTP method, `GET` or `POST`
    pub method: String,
    /// Namespace declared on the request root
    pub namespace: String,
    pub envelope: EnvelopeKind,
    /// Service name used in log lines
    pub service: String,
}

/// Credentials substituted into header templates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub appid: Option<String>,
    pub devid: Option<String>,
    pub certid: Option<String>,
    pub token: Option<String>,
    pub iaf_token: Option<String>,
    pub siteid: Option<String>,
}

/// Service version, with per-operation overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VersionsConfig {
    pub default: String,
    pub operations: BTreeMap<String, String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    /// Overrides the default `xmlsvc/<version>` user agent
    pub user_agent: Option<String>,
    pub verify_tls: bool,
    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Cap for the exponential backoff in milliseconds
    pub max_retry_delay_ms: u64,
}

/// Batch dispatcher limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requests in flight at once
    pub max_concurrency: usize,
    /// Deadline for each dispatch round in seconds
    pub round_timeout_seconds: u64,
}

/// Decode tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CodecConfig {
    /// Dotted paths that always decode to lists
    pub list_nodes: Vec<String>,
    /// Field names parsed as timestamps (case-insensitive)
    pub datetime_nodes: Vec<String>,
}

/// Service adapter behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Header name to template; see `XmlService` for placeholders
    pub headers: BTreeMap<String, String>,
    pub error_style: ErrorStyle,
    /// Raise service failures on single calls
    pub errors: bool,
    /// Log service warnings
    pub warnings: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            uri: "/".to_string(),
            https: false,
            method: "POST".to_string(),
            namespace: String::new(),
            envelope: EnvelopeKind::Plain,
            service: "xml".to_string(),
        }
    }
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            default: "1.0.0".to_string(),
            operations: BTreeMap::new(),
        }
    }
}

impl VersionsConfig {
    /// Version for `verb`, falling back to the default
    pub fn for_verb(&self, verb: &str) -> &str {
        self.operations
            .get(verb)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            proxy_host: None,
            proxy_port: None,
            user_agent: None,
            verify_tls: true,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            round_timeout_seconds: 60,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            error_style: ErrorStyle::None,
            errors: true,
            warnings: true,
        }
    }
}

impl Config {
    /// Full endpoint URL built from scheme, domain and uri
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.endpoint.https { "https" } else { "http" };
        let uri = &self.endpoint.uri;
        if uri.starts_with('/') {
            format!("{scheme}://{}{uri}", self.endpoint.domain)
        } else {
            format!("{scheme}://{}/{uri}", self.endpoint.domain)
        }
    }

    /// `host:port` of the configured proxy
    pub fn proxy(&self) -> Option<String> {
        let host = self.network.proxy_host.as_ref()?;
        Some(format!("{host}:{}", self.network.proxy_port.unwrap_or(80)))
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.round_timeout_seconds)
    }
}

/// Explicit settings from constructor arguments or the command line
///
/// Each `Some` wins over every other layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub domain: Option<String>,
    pub uri: Option<String>,
    pub https: Option<bool>,
    pub appid: Option<String>,
    pub devid: Option<String>,
    pub certid: Option<String>,
    pub token: Option<String>,
    pub siteid: Option<String>,
    pub version: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub max_concurrency: Option<usize>,
    pub errors: Option<bool>,
    pub warnings: Option<bool>,
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> overrides
    pub async fn load(overrides: &ConfigOverrides) -> Result<Config> {
        Self::load_with(&SystemEnvProvider, overrides).await
    }

    /// Load configuration reading the environment through `env`
    pub async fn load_with(env: &impl EnvProvider, overrides: &ConfigOverrides) -> Result<Config> {
        // Sections missing from a file keep their defaults
        let config = match &overrides.config_file {
            Some(path) => Self::load_from_file(path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        let config = Self::apply_environment_overrides_with(env, config)?;
        let config = Self::apply_overrides(config, overrides);

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a file (TOML, JSON or YAML)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = ["xmlsvc.toml", "xmlsvc.json", "xmlsvc.yaml"];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xmlsvc");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply `XMLSVC_*` overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Endpoint
        if let Some(domain) = env.get("XMLSVC_DOMAIN") {
            config.endpoint.domain = domain;
        }
        if let Some(uri) = env.get("XMLSVC_URI") {
            config.endpoint.uri = uri;
        }
        if let Some(https) = parse_env(env, "XMLSVC_HTTPS")? {
            config.endpoint.https = https;
        }

        // Credentials
        let credentials = &mut config.credentials;
        for (key, slot) in [
            ("XMLSVC_APPID", &mut credentials.appid),
            ("XMLSVC_DEVID", &mut credentials.devid),
            ("XMLSVC_CERTID", &mut credentials.certid),
            ("XMLSVC_TOKEN", &mut credentials.token),
            ("XMLSVC_IAF_TOKEN", &mut credentials.iaf_token),
            ("XMLSVC_SITEID", &mut credentials.siteid),
        ] {
            if let Some(value) = env.get(key) {
                *slot = Some(value);
            }
        }

        if let Some(version) = env.get("XMLSVC_VERSION") {
            config.versions.default = version;
        }

        // Network
        if let Some(timeout) = parse_env(env, "XMLSVC_TIMEOUT")? {
            config.network.timeout_seconds = timeout;
        }
        if let Some(host) = env.get("XMLSVC_PROXY_HOST") {
            config.network.proxy_host = Some(host);
        }
        if let Some(port) = parse_env(env, "XMLSVC_PROXY_PORT")? {
            config.network.proxy_port = Some(port);
        }

        // Dispatch
        if let Some(concurrency) = parse_env(env, "XMLSVC_CONCURRENCY")? {
            config.dispatch.max_concurrency = concurrency;
        }

        Ok(config)
    }

    /// Apply explicit overrides (highest precedence)
    pub fn apply_overrides(mut config: Config, overrides: &ConfigOverrides) -> Config {
        if let Some(domain) = &overrides.domain {
            config.endpoint.domain = domain.clone();
        }
        if let Some(uri) = &overrides.uri {
            config.endpoint.uri = uri.clone();
        }
        if let Some(https) = overrides.https {
            config.endpoint.https = https;
        }

        let credentials = &mut config.credentials;
        for (value, slot) in [
            (&overrides.appid, &mut credentials.appid),
            (&overrides.devid, &mut credentials.devid),
            (&overrides.certid, &mut credentials.certid),
            (&overrides.token, &mut credentials.token),
            (&overrides.siteid, &mut credentials.siteid),
        ] {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        if let Some(version) = &overrides.version {
            config.versions.default = version.clone();
        }
        if let Some(timeout) = overrides.timeout_seconds {
            config.network.timeout_seconds = timeout;
        }
        if overrides.proxy_host.is_some() {
            config.network.proxy_host.clone_from(&overrides.proxy_host);
        }
        if overrides.proxy_port.is_some() {
            config.network.proxy_port = overrides.proxy_port;
        }
        if let Some(concurrency) = overrides.max_concurrency {
            config.dispatch.max_concurrency = concurrency;
        }
        if let Some(errors) = overrides.errors {
            config.service.errors = errors;
        }
        if let Some(warnings) = overrides.warnings {
            config.service.warnings = warnings;
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.endpoint.domain.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Endpoint domain must not be empty".to_string(),
            ));
        }

        if !matches!(config.endpoint.method.to_ascii_uppercase().as_str(), "GET" | "POST") {
            return Err(ConfigError::Validation(format!(
                "Unsupported HTTP method: {}",
                config.endpoint.method
            )));
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if config.network.proxy_port.is_some() && config.network.proxy_host.is_none() {
            return Err(ConfigError::Validation(
                "Proxy port given without a proxy host".to_string(),
            ));
        }

        if config.dispatch.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if config.dispatch.max_concurrency > 1000 {
            return Err(ConfigError::Validation(
                "Concurrency cannot exceed 1000".to_string(),
            ));
        }

        if config.dispatch.round_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Round timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, raw))),
    }
}
