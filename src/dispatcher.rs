//! Concurrent batch dispatch
//!
//! A [`Batch`] collects exchanges, then [`Batch::drive`] sends them through one
//! shared transport in up to [`MAX_ROUNDS`] rounds:
//!
//! - every round takes the Pending and Retry exchanges in submission order
//! - at most `max_concurrency` requests are in flight at once, multiplexed on the
//!   calling task; the only suspension point is waiting for the next completion
//! - a per-round deadline bounds that wait; exchanges still in flight when it
//!   passes count as transport failures
//! - transport failures are retried in the next round after a backoff; every
//!   other failure is final at once
//! - requests still queued behind the concurrency limit at the deadline were never
//!   sent; they go back to the next round without spending an attempt
//!
//! Failures never abort the batch. Each failed exchange contributes one entry to
//! the batch error list, in completion order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TransportError;
use crate::exchange::Exchange;
use crate::transport::{RetryPolicy, Transport, WireResponse};

/// Rounds a batch may use, the first one included
pub const MAX_ROUNDS: u32 = 3;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Requests in flight at once
    pub max_concurrency: usize,
    /// Deadline for each round
    pub round_timeout: Duration,
    /// Backoff before each round after the first
    pub retry: RetryPolicy,
    /// Log service warnings found in responses
    pub log_warnings: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            round_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            log_warnings: true,
        }
    }
}

impl From<&Config> for DispatcherConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.dispatch.max_concurrency,
            round_timeout: config.round_timeout(),
            retry: RetryPolicy {
                attempts: MAX_ROUNDS,
                retry_delay_ms: config.network.retry_delay_ms,
                max_retry_delay_ms: config.network.max_retry_delay_ms,
            },
            log_warnings: config.service.warnings,
        }
    }
}

/// Per-exchange position in the batch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    Pending,
    InFlight,
    Retry,
    Completed,
    Failed,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Completed | ExchangeState::Failed)
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Pending => "pending",
            ExchangeState::InFlight => "in-flight",
            ExchangeState::Retry => "retry",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Hands out batches sharing one transport
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Start an empty batch
    pub fn batch(&self) -> Batch {
        Batch {
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            exchanges: Vec::new(),
            states: Vec::new(),
            errors: Vec::new(),
            rounds: 0,
            elapsed: Duration::ZERO,
            driven: false,
        }
    }
}

/// Exchanges driven together; lives for a single [`Batch::drive`]
pub struct Batch {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    exchanges: Vec<Exchange>,
    states: Vec<ExchangeState>,
    errors: Vec<String>,
    rounds: u32,
    elapsed: Duration,
    driven: bool,
}

impl Batch {
    /// Add an exchange; returns its index in submission order
    pub fn submit(&mut self, exchange: Exchange) -> usize {
        self.exchanges.push(exchange);
        self.states.push(ExchangeState::Pending);
        self.exchanges.len() - 1
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<ExchangeState> {
        self.states.get(index).copied()
    }

    pub fn exchange(&self, index: usize) -> Option<&Exchange> {
        self.exchanges.get(index)
    }

    /// Errors aggregated so far, in completion order
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Send every submitted exchange until each is Completed or Failed
    ///
    /// Never fails: per-exchange failures are recorded on the batch.
    pub async fn drive(&mut self) {
        if self.driven {
            debug!("Batch already driven, ignoring");
            return;
        }
        self.driven = true;

        let started = Instant::now();
        for round in 1..=MAX_ROUNDS {
            let candidates = self.candidates();
            if candidates.is_empty() {
                break;
            }

            if round > 1 {
                self.config.retry.wait(round - 2).await;
            }
            self.rounds = round;
            info!(round, exchanges = candidates.len(), "Dispatching round");

            self.run_round(round, &candidates).await;
        }
        self.elapsed = started.elapsed();

        info!(
            rounds = self.rounds,
            exchanges = self.exchanges.len(),
            failed = self.errors.len(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Batch finished"
        );
    }

    fn candidates(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| matches!(state, ExchangeState::Pending | ExchangeState::Retry))
            .map(|(index, _)| index)
            .collect()
    }

    async fn run_round(&mut self, round: u32, candidates: &[usize]) {
        let mut requests = Vec::with_capacity(candidates.len());
        let mut previous = Vec::with_capacity(candidates.len());
        for &index in candidates {
            previous.push(self.states[index]);
            self.states[index] = ExchangeState::InFlight;
            requests.push((index, self.exchanges[index].request().clone()));
        }

        // Set by each request when buffer_unordered first polls it
        let started: Arc<Vec<AtomicBool>> =
            Arc::new(candidates.iter().map(|_| AtomicBool::new(false)).collect());

        let transport = Arc::clone(&self.transport);
        let flags = Arc::clone(&started);
        let mut in_flight = stream::iter(requests.into_iter().enumerate())
            .map(move |(slot, (index, request))| {
                let transport = Arc::clone(&transport);
                let flags = Arc::clone(&flags);
                async move {
                    flags[slot].store(true, Ordering::Release);
                    (index, transport.send(&request).await)
                }
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        let deadline = Instant::now() + self.config.round_timeout;
        loop {
            match timeout_at(deadline, in_flight.next()).await {
                Ok(Some((index, result))) => self.settle(index, round, result),
                Ok(None) => break,
                Err(_) => {
                    let elapsed_ms = self.config.round_timeout.as_millis() as u64;
                    warn!(round, elapsed_ms, "Round deadline passed");

                    for (slot, &index) in candidates.iter().enumerate() {
                        if self.states[index] != ExchangeState::InFlight {
                            continue;
                        }
                        if started[slot].load(Ordering::Acquire) {
                            self.settle(index, round, Err(TransportError::Deadline { elapsed_ms }));
                        } else {
                            self.requeue(index, round, previous[slot]);
                        }
                    }
                    break;
                }
            }
        }
    }

    /// Record the result of a request that reached the transport
    fn settle(&mut self, index: usize, round: u32, result: Result<WireResponse, TransportError>) {
        let exchange = &mut self.exchanges[index];
        exchange.begin_attempt();

        match result {
            Ok(wire) => exchange.decode(wire),
            Err(error) => {
                if round < MAX_ROUNDS {
                    warn!(
                        request_id = %exchange.request().request_id,
                        verb = exchange.verb(),
                        round,
                        error = %error,
                        "Transport failure, will retry"
                    );
                    exchange.fail_transport(error);
                    self.states[index] = ExchangeState::Retry;
                    return;
                }
                exchange.fail_transport(error);
            }
        }

        self.finish(index);
    }

    /// Put back an exchange whose request never started; no attempt is spent
    fn requeue(&mut self, index: usize, round: u32, previous: ExchangeState) {
        if round < MAX_ROUNDS {
            self.states[index] = previous;
            return;
        }

        let exchange = &mut self.exchanges[index];
        debug!(
            request_id = %exchange.request().request_id,
            verb = exchange.verb(),
            "Request never sent"
        );
        // A real failure from an earlier round is the better report
        if !exchange.is_transport_failure() {
            exchange.fail_transport(TransportError::NotSent { rounds: round });
        }
        self.finish(index);
    }

    fn finish(&mut self, index: usize) {
        let exchange = &self.exchanges[index];

        if self.config.log_warnings && !exchange.warnings().is_empty() {
            warn!("{}: {}", exchange.verb(), exchange.warnings().join("\n"));
        }

        match exchange.failure() {
            None => self.states[index] = ExchangeState::Completed,
            Some(failure) => {
                let entry = failure.to_string();
                warn!(request_id = %exchange.request().request_id, "{}", entry);
                self.errors.push(entry);
                self.states[index] = ExchangeState::Failed;
            }
        }
    }

    /// Finish the batch and hand the exchanges back
    pub fn collect(self) -> BatchReport {
        BatchReport {
            exchanges: self.exchanges,
            states: self.states,
            errors: self.errors,
            rounds: self.rounds,
            elapsed: self.elapsed,
        }
    }
}

/// Outcome of a driven batch
#[derive(Debug)]
pub struct BatchReport {
    exchanges: Vec<Exchange>,
    states: Vec<ExchangeState>,
    errors: Vec<String>,
    rounds: u32,
    elapsed: Duration,
}

impl BatchReport {
    /// All exchanges in submission order
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn into_exchanges(self) -> Vec<Exchange> {
        self.exchanges
    }

    pub fn successes(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter().filter(|exchange| exchange.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter().filter(|exchange| !exchange.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.exchanges.len() - self.success_count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count() == 0
    }

    pub fn states(&self) -> &[ExchangeState] {
        &self.states
    }

    /// One entry per failed exchange, in completion order
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// The error entries as one message, if any
    pub fn error(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(format!(
            "{} of {} exchanges failed:\n{}",
            self.errors.len(),
            self.exchanges.len(),
            self.errors.join("\n")
        ))
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
