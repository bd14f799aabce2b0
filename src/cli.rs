use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ConfigOverrides;
use crate::error::{Error, Result};
use crate::node::Payload;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

impl VerbosityLevel {
    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Summary,
}

/// Call XML services from the command line
#[derive(Parser, Debug, Clone)]
#[command(name = "xmlsvc")]
#[command(about = "Call loosely-typed XML services, one at a time or in concurrent batches")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Service host name
    #[arg(long = "domain", global = true)]
    pub domain: Option<String>,

    /// Endpoint path on the host
    #[arg(long = "uri", global = true)]
    pub uri: Option<String>,

    /// Use HTTPS
    #[arg(long = "https", global = true)]
    pub https: bool,

    #[arg(long = "appid", global = true)]
    pub appid: Option<String>,

    #[arg(long = "token", global = true)]
    pub token: Option<String>,

    #[arg(long = "siteid", global = true)]
    pub siteid: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Maximum exchanges in flight during a batch
    #[arg(long = "concurrency", global = true)]
    pub concurrency: Option<usize>,

    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub format: OutputFormat,

    /// Enable verbose output (repeat for debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        conflicts_with = "verbose",
        global = true
    )]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Call one verb and print its response
    Call {
        verb: String,

        /// Request payload as a JSON object
        #[arg(short = 'p', long = "payload")]
        payload: Option<String>,
    },
    /// Run every call listed in a JSON file as one batch
    Batch { file: PathBuf },
}

/// One call listed in a batch file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchEntry {
    pub verb: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        match (self.quiet, self.verbose) {
            (true, _) => VerbosityLevel::Quiet,
            (false, 0) => VerbosityLevel::Normal,
            (false, 1) => VerbosityLevel::Verbose,
            _ => VerbosityLevel::Debug,
        }
    }

    /// Settings given on the command line, layered over file and environment
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            domain: self.domain.clone(),
            uri: self.uri.clone(),
            https: self.https.then_some(true),
            appid: self.appid.clone(),
            token: self.token.clone(),
            siteid: self.siteid.clone(),
            timeout_seconds: self.timeout,
            max_concurrency: self.concurrency,
            ..Default::default()
        }
    }
}

/// Parse a `--payload` argument; an absent payload sends an empty body
pub fn parse_payload(raw: Option<&str>) -> Result<Payload> {
    match raw {
        None => Ok(Payload::Empty),
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| Error::InvalidRequest(format!("Invalid payload JSON: {e}")))?;
            Ok(Payload::from(value))
        }
    }
}

/// Read a batch file holding a JSON array of `{verb, payload}` objects
pub fn read_batch_file(path: &Path) -> Result<Vec<BatchEntry>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        Error::InvalidRequest(format!("Invalid batch file {}: {e}", path.display()))
    })
}
