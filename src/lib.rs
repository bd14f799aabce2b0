//! # xmlsvc Library
//!
//! An async client engine for loosely-typed XML services. Requests are encoded
//! from generic key/value trees, responses are decoded back into them, and a
//! bounded-concurrency dispatcher drives many exchanges at once with a
//! three-round retry for transport failures.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod node;
pub mod output;
pub mod response;
pub mod service;
pub mod tables;
pub mod transport;
pub mod view;

pub use client::Client;
pub use codec::XmlCodec;
pub use config::{Config, ConfigError, ConfigManager, ConfigOverrides};
pub use dispatcher::{Batch, BatchReport, Dispatcher, DispatcherConfig, ExchangeState, MAX_ROUNDS};
pub use error::{
    CodecError, Error, ExchangeFailure, FailureKind, Result, TransportError, ViewError,
};
pub use exchange::{Exchange, ExchangeOutcome};
pub use node::{Node, NodeMap, Payload};
pub use response::Response;
pub use service::{EnvelopeKind, ErrorStyle, ServiceAdapter, ServiceErrors, XmlService};
pub use tables::{DateTimeTable, ListTable};
pub use transport::{
    HttpClientConfig, HttpTransport, RetryPolicy, Transport, WireRequest, WireResponse,
};
pub use view::View;
