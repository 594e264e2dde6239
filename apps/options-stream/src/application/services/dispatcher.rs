//! Live Update Dispatcher
//!
//! Turns client intents (connect, subscribe, update, unsubscribe,
//! disconnect) into registry operations, and runs the polling workers that
//! fetch provider data and push it through the transport.
//!
//! # Worker loop
//!
//! Each iteration checks the market hours gate, calls the provider, emits
//! the result, then waits one poll interval. The provider call and the wait
//! both race the worker's cancellation token, so a cancelled worker stops
//! within one scheduling quantum and never emits afterwards.
//!
//! A worker stops for good when:
//! - the gate reports closed (one market-closed notice is sent first)
//! - the provider fails (one error notice is sent first)
//! - it is cancelled

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, info, info_span, warn};

use crate::application::ports::{
    ChainUpdate, ClockPort, IndexesUpdate, MarketDataError, MarketDataPort, ServerEvent,
    TransportPort, UpdatePayload,
};
use crate::domain::market_hours::MarketHoursGate;
use crate::domain::subscription::{
    ChainRequest, ConnectionId, SubscriptionKey, SubscriptionParams, Topic, TopicAudience,
    ValidationError,
};
use crate::infrastructure::metrics::{self, StopReason};

use super::registry::{RegistryError, SubscriptionHandle, SubscriptionRegistry, WorkerContext};

// =============================================================================
// Configuration and Errors
// =============================================================================

/// Default interval between provider calls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wait between provider calls.
    pub poll_interval: Duration,
    /// Symbols served on the indexes topic.
    pub index_symbols: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            index_symbols: vec!["DIA".to_string(), "QQQ".to_string(), "SPY".to_string()],
        }
    }
}

/// Dispatcher operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Client parameters were invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The registry refused the install.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// =============================================================================
// Worker Context
// =============================================================================

/// Dependencies shared by the dispatcher and every worker it spawns.
struct PollContext {
    provider: Arc<dyn MarketDataPort>,
    transport: Arc<dyn TransportPort>,
    clock: Arc<dyn ClockPort>,
    gate: MarketHoursGate,
    config: DispatcherConfig,
}

impl PollContext {
    fn market_is_open(&self) -> bool {
        self.gate.is_open(self.clock.now())
    }

    fn deliver(&self, target: Target, event: ServerEvent) -> usize {
        match target {
            Target::Connection(connection) => {
                usize::from(self.transport.emit(connection, event))
            }
            Target::Room(topic) => self.transport.broadcast(topic, event),
        }
    }
}

/// Where a worker's events go.
#[derive(Debug, Clone, Copy)]
enum Target {
    Connection(ConnectionId),
    Room(Topic),
}

/// What a worker polls.
enum PollJob {
    Chain {
        connection: ConnectionId,
        request: ChainRequest,
        echo: SubscriptionParams,
    },
    Indexes,
}

impl PollJob {
    const fn topic(&self) -> Topic {
        match self {
            Self::Chain { .. } => Topic::SingleSymbol,
            Self::Indexes => Topic::Indexes,
        }
    }

    const fn target(&self) -> Target {
        match self {
            Self::Chain { connection, .. } => Target::Connection(*connection),
            Self::Indexes => Target::Room(Topic::Indexes),
        }
    }

    async fn poll(&self, ctx: &PollContext) -> Result<UpdatePayload, MarketDataError> {
        match self {
            Self::Chain { request, echo, .. } => {
                let chain = ctx
                    .provider
                    .get_option_chain(&request.symbol, request.expiration)
                    .await?;
                let update = ChainUpdate::from_chain(chain, Some(echo.clone()));
                Ok(UpdatePayload::Chain(Box::new(update)))
            }
            Self::Indexes => {
                let quotes = ctx.provider.get_quotes(&ctx.config.index_symbols).await?;
                Ok(UpdatePayload::Indexes(IndexesUpdate::from_quotes(quotes)))
            }
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes client intents to the subscription registry.
pub struct LiveUpdateDispatcher {
    ctx: Arc<PollContext>,
    registry: Arc<SubscriptionRegistry>,
    indexes_audience: tokio::sync::Mutex<TopicAudience>,
}

impl std::fmt::Debug for LiveUpdateDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateDispatcher")
            .field("registry", &self.registry)
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl LiveUpdateDispatcher {
    /// Wire a dispatcher to its ports.
    #[must_use]
    pub fn new(
        provider: Arc<dyn MarketDataPort>,
        transport: Arc<dyn TransportPort>,
        clock: Arc<dyn ClockPort>,
        gate: MarketHoursGate,
        registry: Arc<SubscriptionRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(PollContext {
                provider,
                transport,
                clock,
                gate,
                config,
            }),
            registry,
            indexes_audience: tokio::sync::Mutex::new(TopicAudience::default()),
        }
    }

    /// The registry this dispatcher installs workers into.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Whether the gate is open right now.
    #[must_use]
    pub fn market_is_open(&self) -> bool {
        self.ctx.market_is_open()
    }

    /// Number of connections in the indexes audience.
    pub async fn indexes_audience(&self) -> usize {
        self.indexes_audience.lock().await.len()
    }

    /// Handle a new connection.
    ///
    /// With the market closed the connection receives the market-closed
    /// notice and every live worker is drained; the connection itself
    /// stays open. Returns whether the market is open.
    pub async fn connect(&self, connection: ConnectionId, topic: Topic) -> bool {
        if self.market_is_open() {
            debug!(connection_id = %connection, topic = %topic, "Client connected");
            self.emit(connection, ServerEvent::message(format!("Connected to {topic} feed")));
            return true;
        }

        self.emit(connection, ServerEvent::market_closed());
        let stopped = self.registry.drain().await;
        info!(
            connection_id = %connection,
            topic = %topic,
            stopped,
            "Client connected while market closed, drained workers"
        );
        false
    }

    /// Start live updates for a connection.
    ///
    /// On a validation or registry failure the connection receives an
    /// error notice and no worker is started.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` describing why nothing was started.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        topic: Topic,
        params: SubscriptionParams,
    ) -> Result<SubscriptionHandle, DispatchError> {
        let subject = subject(topic, &params);
        let result = match topic {
            Topic::SingleSymbol => self.install_chain(connection, params, false).await,
            Topic::Indexes => self.join_indexes(connection).await,
        };
        self.acknowledge(connection, topic, &result, &format!("Subscribed to {subject}"));
        result
    }

    /// Replace a connection's parameters.
    ///
    /// The old worker has stopped emitting by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` describing why nothing was started. The
    /// previous worker keeps running on a validation failure.
    pub async fn update(
        &self,
        connection: ConnectionId,
        topic: Topic,
        params: SubscriptionParams,
    ) -> Result<SubscriptionHandle, DispatchError> {
        let subject = subject(topic, &params);
        let result = match topic {
            Topic::SingleSymbol => self.install_chain(connection, params, true).await,
            Topic::Indexes => self.join_indexes(connection).await,
        };
        self.acknowledge(
            connection,
            topic,
            &result,
            &format!("Updated subscription to {subject}"),
        );
        result
    }

    /// Stop a connection's updates on a topic. Idempotent.
    pub async fn unsubscribe(&self, connection: ConnectionId, topic: Topic) -> bool {
        let stopped = match topic {
            Topic::SingleSymbol => {
                self.registry
                    .unsubscribe(&SubscriptionKey::connection(connection, topic))
                    .await
            }
            Topic::Indexes => self.leave_indexes(connection).await,
        };
        self.emit(connection, ServerEvent::message(format!("Unsubscribed from {topic}")));
        stopped
    }

    /// Tear down everything a connection owns. Idempotent.
    pub async fn disconnect(&self, connection: ConnectionId) -> usize {
        let stopped = self.registry.unsubscribe_all(connection).await;
        self.leave_indexes(connection).await;
        self.emit(connection, ServerEvent::message("Disconnected"));
        debug!(connection_id = %connection, stopped, "Client disconnected");
        stopped
    }

    /// Stop every worker and refuse new subscriptions.
    pub async fn shutdown(&self) -> usize {
        let stopped = self.registry.shutdown().await;
        *self.indexes_audience.lock().await = TopicAudience::default();
        stopped
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn install_chain(
        &self,
        connection: ConnectionId,
        params: SubscriptionParams,
        replace: bool,
    ) -> Result<SubscriptionHandle, DispatchError> {
        let request = params.to_chain_request()?;
        let key = SubscriptionKey::connection(connection, Topic::SingleSymbol);
        let job = PollJob::Chain {
            connection,
            request,
            echo: params.clone(),
        };
        let ctx = Arc::clone(&self.ctx);
        let worker = move |worker: WorkerContext| run_worker(ctx, worker, job);

        let handle = if replace {
            self.registry.update(key, params, worker).await?
        } else {
            self.registry.subscribe(key, params, worker).await?
        };
        Ok(handle)
    }

    async fn join_indexes(
        &self,
        connection: ConnectionId,
    ) -> Result<SubscriptionHandle, DispatchError> {
        let mut audience = self.indexes_audience.lock().await;
        let key = SubscriptionKey::shared(Topic::Indexes);

        audience.join(connection);
        self.ctx.transport.join(connection, Topic::Indexes);

        // A retiring worker is replaced rather than joined.
        if let Some(handle) = self.registry.live_handle(&key) {
            return Ok(handle);
        }

        let ctx = Arc::clone(&self.ctx);
        let installed = self
            .registry
            .subscribe(key, SubscriptionParams::default(), move |worker| {
                run_worker(ctx, worker, PollJob::Indexes)
            })
            .await;

        match installed {
            Ok(handle) => Ok(handle),
            Err(e) => {
                audience.leave(connection);
                self.ctx.transport.leave(connection, Topic::Indexes);
                Err(e.into())
            }
        }
    }

    /// Returns whether the shared worker was stopped.
    async fn leave_indexes(&self, connection: ConnectionId) -> bool {
        let mut audience = self.indexes_audience.lock().await;
        if !audience.contains(connection) {
            return false;
        }

        self.ctx.transport.leave(connection, Topic::Indexes);
        if audience.leave(connection) {
            return self
                .registry
                .unsubscribe(&SubscriptionKey::shared(Topic::Indexes))
                .await;
        }
        false
    }

    fn acknowledge(
        &self,
        connection: ConnectionId,
        topic: Topic,
        result: &Result<SubscriptionHandle, DispatchError>,
        ack: &str,
    ) {
        match result {
            // A closed market is reported by the worker itself.
            Ok(_) if !self.market_is_open() => {}
            Ok(_) => self.emit(connection, ServerEvent::message(ack)),
            Err(e) => {
                warn!(connection_id = %connection, topic = %topic, error = %e, "Subscription rejected");
                self.emit(connection, ServerEvent::error(e.to_string()));
            }
        }
    }

    fn emit(&self, connection: ConnectionId, event: ServerEvent) {
        self.ctx.deliver(Target::Connection(connection), event);
    }
}

/// What an acknowledgement names: the symbol, or the topic itself.
fn subject(topic: Topic, params: &SubscriptionParams) -> String {
    match (topic, params.symbol.as_deref().map(str::trim)) {
        (Topic::SingleSymbol, Some(symbol)) if !symbol.is_empty() => symbol.to_uppercase(),
        _ => topic.to_string(),
    }
}

// =============================================================================
// Worker
// =============================================================================

async fn run_worker(ctx: Arc<PollContext>, worker: WorkerContext, job: PollJob) {
    let span = info_span!("poll_worker", key = %worker.key, subscription_id = worker.id);
    let topic = job.topic();

    async move {
        debug!("Worker started");
        let reason = poll_loop(&ctx, &worker, &job).await;
        metrics::record_worker_stopped(topic, reason);
        debug!(reason = reason.as_str(), "Worker finished");
    }
    .instrument(span)
    .await;
}

async fn poll_loop(ctx: &PollContext, worker: &WorkerContext, job: &PollJob) -> StopReason {
    let cancel = &worker.cancel;
    let topic = job.topic();
    let target = job.target();

    loop {
        if cancel.is_cancelled() {
            return StopReason::Cancelled;
        }

        if !ctx.market_is_open() {
            worker.retire();
            ctx.deliver(target, ServerEvent::market_closed());
            info!("Market closed, stopping worker");
            return StopReason::MarketClosed;
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return StopReason::Cancelled,
            result = job.poll(ctx) => result,
        };

        match result {
            Ok(payload) => {
                metrics::record_poll(topic, "ok", started.elapsed());
                if cancel.is_cancelled() {
                    return StopReason::Cancelled;
                }
                ctx.deliver(target, ServerEvent::Data(payload));
            }
            Err(e) => {
                metrics::record_poll(topic, e.kind(), started.elapsed());
                if cancel.is_cancelled() {
                    return StopReason::Cancelled;
                }
                warn!(error = %e, "Provider call failed, stopping worker");
                worker.retire();
                ctx.deliver(target, ServerEvent::error(e.to_string()));
                return StopReason::ProviderError;
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return StopReason::Cancelled,
            () = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
