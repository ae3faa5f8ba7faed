//! Quote Stream Client
//!
//! Owns the single live market-data connection: subscribes and unsubscribes
//! symbols, feeds the shared quote cache from a receive loop, and self-heals
//! across transport failures and silent stalls.
//!
//! # Tasks and locking
//!
//! Three tasks touch connection state: the receive loop, the stale watchdog,
//! and an in-flight rebuild. All protocol-level operations (login, rebuild,
//! subscribe, unsubscribe, logout) serialize on one async mutex so a
//! watchdog-triggered restart and a transport-triggered restart can never run
//! rebuild logic concurrently, and so subscription-set mutation is atomic
//! with the resubscribe step taken during reconnect. A restart generation
//! counter lets a trigger that lost the race detect the rebuild already
//! happened and skip.
//!
//! # Failure classes
//!
//! Heartbeat staleness resets the transport error streak (it is not a
//! transport failure, so it must not grow the backoff). Hard transport errors
//! apply capped exponential backoff and, once failures persist past a
//! duration threshold, raise a single operator alert. Login/auth failures are
//! fatal: alerted, never auto-retried.

pub mod cache;
pub mod health;
pub mod watchdog;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::retry::BackoffPolicy;
use crate::broker::{AlertSink, BrokerError, MarketStream};
use crate::config::StreamSettings;
use crate::models::{FeedKind, QuoteSnapshot, Symbol};
use crate::subscription::SubscriptionSink;

use cache::QuoteCache;
use health::ConnectionHealth;
use watchdog::{StaleWatchdog, WatchdogConfig, WatchdogEvent};

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced by the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// Login failed fatally (credentials problem requiring operator action).
    #[error("stream login failed: {0}")]
    Login(#[source] BrokerError),
}

// =============================================================================
// State machine
// =============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not started (or stopped).
    Idle,
    /// Initial login in progress.
    Connecting,
    /// Logged in, receive loop not yet confirmed.
    LoggedIn,
    /// Receiving normally.
    Streaming,
    /// Reconnect in progress or pending.
    Recovering,
    /// Fatal failure; operator action required.
    Failed,
}

/// Why a rebuild was triggered.
enum RestartCause {
    /// A hard transport error from the receive loop.
    Transport {
        /// Restart generation observed when the error occurred.
        observed_generation: u64,
    },
    /// The watchdog detected a silent stall.
    Stale {
        /// Gap since the last message at detection time.
        gap: Duration,
    },
}

// =============================================================================
// Subscription sets
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionSets {
    options: HashSet<Symbol>,
    equities: HashSet<Symbol>,
}

impl SubscriptionSets {
    fn set(&self, kind: FeedKind) -> &HashSet<Symbol> {
        match kind {
            FeedKind::Options => &self.options,
            FeedKind::Equities => &self.equities,
        }
    }

    fn set_mut(&mut self, kind: FeedKind) -> &mut HashSet<Symbol> {
        match kind {
            FeedKind::Options => &mut self.options,
            FeedKind::Equities => &mut self.equities,
        }
    }
}

// =============================================================================
// Quote Stream Client
// =============================================================================

/// The one streaming connection, its quote cache, and its self-healing
/// machinery.
pub struct QuoteStreamClient<S: MarketStream> {
    stream: Arc<S>,
    settings: StreamSettings,
    alerts: Arc<dyn AlertSink>,
    cache: QuoteCache,
    subs: RwLock<SubscriptionSets>,
    health: Arc<ConnectionHealth>,
    state: RwLock<StreamState>,
    cancel: RwLock<CancellationToken>,
    /// Serializes login/rebuild/subscribe/unsubscribe/logout.
    io_guard: tokio::sync::Mutex<()>,
    backoff: tokio::sync::Mutex<BackoffPolicy>,
    started: AtomicBool,
}

impl<S: MarketStream + 'static> QuoteStreamClient<S> {
    /// Create a client over a streaming facade. Nothing runs until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(stream: S, settings: StreamSettings, alerts: Arc<dyn AlertSink>) -> Self {
        let backoff = BackoffPolicy::new(settings.backoff.clone());
        Self {
            stream: Arc::new(stream),
            settings,
            alerts,
            cache: QuoteCache::new(),
            subs: RwLock::new(SubscriptionSets::default()),
            health: Arc::new(ConnectionHealth::new()),
            state: RwLock::new(StreamState::Idle),
            cancel: RwLock::new(CancellationToken::new()),
            io_guard: tokio::sync::Mutex::new(()),
            backoff: tokio::sync::Mutex::new(backoff),
            started: AtomicBool::new(false),
        }
    }

    /// Open the connection, log in, and launch the receive loop and the
    /// stale watchdog. Idempotent: a second call while running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::Login`] on an auth failure; such
    /// failures are alerted and never auto-retried. Transport trouble during
    /// startup is not an error: the recovery path takes over.
    pub async fn start(self: &Arc<Self>) -> Result<(), StreamClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel.write() = cancel.clone();
        self.set_state(StreamState::Connecting);

        {
            let _io = self.io_guard.lock().await;
            match self.stream.login().await {
                Ok(()) => {
                    self.health.record_recovered();
                    self.set_state(StreamState::LoggedIn);
                }
                Err(error) if error.is_auth() => {
                    self.alerts.notify(&format!(
                        "stream login failed, operator action required: {error}"
                    ));
                    self.set_state(StreamState::Failed);
                    self.started.store(false, Ordering::SeqCst);
                    return Err(StreamClientError::Login(error));
                }
                Err(error) => {
                    tracing::warn!(error = %error, "initial stream login failed, recovery will retry");
                    self.health.record_error();
                    self.set_state(StreamState::Recovering);
                }
            }
        }
        if self.state() == StreamState::LoggedIn {
            self.set_state(StreamState::Streaming);
        }

        let (event_tx, mut event_rx) = mpsc::channel::<WatchdogEvent>(4);
        let watchdog = StaleWatchdog::new(
            self.watchdog_config(),
            Arc::clone(&self.health),
            event_tx,
            cancel.clone(),
        );
        tokio::spawn(watchdog.run());

        let client = Arc::clone(self);
        let restart_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = restart_cancel.cancelled() => break,
                    event = event_rx.recv() => match event {
                        Some(WatchdogEvent::ForceRestart { gap }) => {
                            client.rebuild(RestartCause::Stale { gap }).await;
                        }
                        None => break,
                    }
                }
            }
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.receive_loop(cancel).await;
        });

        Ok(())
    }

    /// Cancel the loops, attempt a graceful logout, and release resources.
    /// Safe to call when already stopped.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.read().cancel();

        let _io = self.io_guard.lock().await;
        if let Err(error) = self.stream.logout().await {
            tracing::debug!(error = %error, "logout failed during shutdown");
        }
        self.set_state(StreamState::Idle);
    }

    /// Subscribe option symbols not already tracked. No-op on an empty diff.
    pub async fn subscribe_options(&self, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.apply_subscribe(FeedKind::Options, symbols).await
    }

    /// Subscribe equity symbols not already tracked. Symbols are normalized
    /// to uppercase. No-op on an empty diff.
    pub async fn subscribe_equities(&self, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.apply_subscribe(FeedKind::Equities, symbols).await
    }

    /// Unsubscribe option symbols currently tracked.
    pub async fn unsubscribe_options(&self, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.apply_unsubscribe(FeedKind::Options, symbols).await
    }

    /// Unsubscribe equity symbols currently tracked.
    pub async fn unsubscribe_equities(&self, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.apply_unsubscribe(FeedKind::Equities, symbols).await
    }

    /// Non-blocking cache read: last trade price, absent when unseen.
    #[must_use]
    pub fn last(&self, symbol: &str) -> Option<Decimal> {
        self.cache.last(symbol)
    }

    /// Non-blocking cache read: bid and ask, either side may be absent.
    #[must_use]
    pub fn bid_ask(&self, symbol: &str) -> (Option<Decimal>, Option<Decimal>) {
        self.cache.bid_ask(symbol)
    }

    /// Non-blocking cache read: full snapshot, absent when unseen.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<QuoteSnapshot> {
        self.cache.snapshot(symbol)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Currently tracked symbols for a feed, sorted.
    #[must_use]
    pub fn subscribed(&self, kind: FeedKind) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.subs.read().set(kind).iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Connection health counters, for status displays.
    #[must_use]
    pub fn connection_health(&self) -> Arc<ConnectionHealth> {
        Arc::clone(&self.health)
    }

    /// Handle to the underlying streaming facade.
    #[must_use]
    pub fn market_stream(&self) -> Arc<S> {
        Arc::clone(&self.stream)
    }

    fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            interval: self.settings.watchdog_interval,
            stale_after: self.settings.stale_after,
            restart_cooldown: self.settings.restart_cooldown,
        }
    }

    fn set_state(&self, next: StreamState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "stream state transition");
            *state = next;
        }
    }

    /// Raise the single persistent-failure alert once the continuous-failure
    /// window crosses the threshold. One alert per outage, not one per retry.
    fn alert_if_persistent(&self) {
        if self.health.should_alert(self.settings.failure_alert_after) {
            self.alerts.notify(&format!(
                "market data stream failing for over {}s",
                self.settings.failure_alert_after.as_secs()
            ));
        }
    }

    fn fail_fatal(&self, error: &BrokerError) {
        self.alerts.notify(&format!(
            "stream authentication failed, operator action required: {error}"
        ));
        self.set_state(StreamState::Failed);
        self.started.store(false, Ordering::SeqCst);
        self.cancel.read().cancel();
    }

    async fn receive_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                outcome = tokio::time::timeout(self.settings.receive_timeout, self.stream.receive()) => {
                    match outcome {
                        Ok(Ok(update)) => {
                            self.health.record_message();
                            self.backoff.lock().await.reset();
                            self.cache.apply(&update);
                            if self.state() != StreamState::Streaming {
                                self.set_state(StreamState::Streaming);
                            }
                        }
                        Ok(Err(error)) if error.is_auth() => {
                            self.fail_fatal(&error);
                            break;
                        }
                        Ok(Err(error)) => {
                            let streak = self.health.record_error();
                            let observed_generation = self.health.generation();
                            tracing::warn!(error = %error, streak, "stream transport error");
                            self.set_state(StreamState::Recovering);
                            self.alert_if_persistent();

                            let delay = self.backoff.lock().await.next_delay();
                            tokio::select! {
                                () = cancel.cancelled() => break,
                                () = tokio::time::sleep(delay) => {}
                            }
                            self.rebuild(RestartCause::Transport { observed_generation }).await;
                        }
                        Err(_elapsed) => {
                            // Idle market; staleness is the watchdog's call.
                            tracing::trace!("receive window elapsed with no message");
                        }
                    }
                }
            }
        }
    }

    /// Tear down and re-establish the session, then restore every retained
    /// subscription (the server forgets them across logins).
    async fn rebuild(&self, cause: RestartCause) {
        let _io = self.io_guard.lock().await;

        match cause {
            RestartCause::Transport { observed_generation } => {
                if self.health.generation() != observed_generation {
                    tracing::debug!("rebuild already handled by a racing trigger");
                    return;
                }
            }
            RestartCause::Stale { gap } => {
                if !self.health.restart_allowed(self.settings.restart_cooldown) {
                    return;
                }
                // Staleness is not a transport failure: no backoff growth.
                self.health.reset_errors();
                self.backoff.lock().await.reset();
                tracing::warn!(gap_secs = gap.as_secs(), "rebuilding stalled stream connection");
            }
        }

        self.health.note_restart();
        self.set_state(StreamState::Recovering);

        match self.stream.login().await {
            Ok(()) => {}
            Err(error) if error.is_auth() => {
                self.fail_fatal(&error);
                return;
            }
            Err(error) => {
                self.health.record_error();
                tracing::warn!(error = %error, "relogin failed, receive loop will retry");
                self.alert_if_persistent();
                return;
            }
        }

        match self.resubscribe_all().await {
            Ok(restored) => {
                self.health.record_recovered();
                self.backoff.lock().await.reset();
                self.set_state(StreamState::Streaming);
                tracing::info!(restored, "stream connection rebuilt, subscriptions restored");
            }
            Err(error) if error.is_auth() => self.fail_fatal(&error),
            Err(error) => {
                self.health.record_error();
                tracing::warn!(error = %error, "resubscription failed, receive loop will retry");
            }
        }
    }

    async fn resubscribe_all(&self) -> Result<usize, BrokerError> {
        let (options, equities) = {
            let subs = self.subs.read();
            let mut options: Vec<Symbol> = subs.options.iter().cloned().collect();
            let mut equities: Vec<Symbol> = subs.equities.iter().cloned().collect();
            options.sort();
            equities.sort();
            (options, equities)
        };

        if !options.is_empty() {
            self.stream.subscribe(FeedKind::Options, &options).await?;
        }
        if !equities.is_empty() {
            self.stream.subscribe(FeedKind::Equities, &equities).await?;
        }
        Ok(options.len() + equities.len())
    }

    async fn apply_subscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError> {
        let requested = normalize(kind, symbols);
        if requested.is_empty() {
            return Ok(());
        }

        let _io = self.io_guard.lock().await;
        let additions: Vec<Symbol> = {
            let subs = self.subs.read();
            let current = subs.set(kind);
            requested
                .into_iter()
                .filter(|symbol| !current.contains(symbol))
                .collect()
        };
        if additions.is_empty() {
            return Ok(());
        }

        self.stream.subscribe(kind, &additions).await?;
        self.subs.write().set_mut(kind).extend(additions);
        Ok(())
    }

    async fn apply_unsubscribe(
        &self,
        kind: FeedKind,
        symbols: &[Symbol],
    ) -> Result<(), BrokerError> {
        let requested = normalize(kind, symbols);
        if requested.is_empty() {
            return Ok(());
        }

        let _io = self.io_guard.lock().await;
        let removals: Vec<Symbol> = {
            let subs = self.subs.read();
            let current = subs.set(kind);
            requested
                .into_iter()
                .filter(|symbol| current.contains(symbol))
                .collect()
        };
        if removals.is_empty() {
            return Ok(());
        }

        self.stream.unsubscribe(kind, &removals).await?;
        {
            let mut subs = self.subs.write();
            let set = subs.set_mut(kind);
            for symbol in &removals {
                set.remove(symbol);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: MarketStream + 'static> SubscriptionSink for QuoteStreamClient<S> {
    async fn sink_subscribe(&self, kind: FeedKind, symbols: &[Symbol]) -> Result<(), BrokerError> {
        self.apply_subscribe(kind, symbols).await
    }

    async fn sink_unsubscribe(
        &self,
        kind: FeedKind,
        symbols: &[Symbol],
    ) -> Result<(), BrokerError> {
        self.apply_unsubscribe(kind, symbols).await
    }
}

/// Normalize a symbol request: drop empties, uppercase equities, dedup while
/// preserving order.
fn normalize(kind: FeedKind, symbols: &[Symbol]) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| match kind {
            FeedKind::Equities => s.to_uppercase(),
            FeedKind::Options => s.clone(),
        })
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
