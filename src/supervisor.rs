// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Drives the connection lifecycle: initial connect with retry, background
//! liveness monitoring, reconnection with session replay and live-query
//! restoration, and graceful shutdown.
//!
//! This owns exactly one live transport at a time and never tries to
//! resurrect a dead one in place: a reconnect spawns a fresh connection,
//! replays what the old one knew, and swaps it in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::Error;
use crate::registry::{self, Registry};
use crate::retry::{RetryDecision, RetryStrategy};
use crate::router::Router;
use crate::session::Session;
use crate::state::{ConnectionState, StateMachine};
use crate::transport::{PayloadDecoder, Transport, TransportFactory};
use crate::value::{Params, Value};

/// Configuration the supervisor needs beyond its collaborators, all of it
/// set once at construction via [`crate::client::ClientBuilder`].
pub struct SupervisorConfig {
    /// How often the monitor checks whether the current transport is still
    /// alive. Defaults to 5 seconds.
    pub monitor_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            monitor_interval: Duration::from_secs(5),
        }
    }
}

/// Owns the current transport and drives connect/reconnect/close.
pub struct Supervisor {
    factory: Arc<dyn TransportFactory>,
    retry: Option<Arc<dyn RetryStrategy>>,
    decoder: Arc<dyn PayloadDecoder>,
    config: SupervisorConfig,

    state: StateMachine,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    session: Arc<Session>,
    registry: Arc<Registry>,
    router: Arc<Router>,

    close_signal: CancellationToken,
    monitor_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Build a new, not-yet-connected supervisor.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        retry: Option<Arc<dyn RetryStrategy>>,
        decoder: Arc<dyn PayloadDecoder>,
        config: SupervisorConfig,
        session: Arc<Session>,
        registry: Arc<Registry>,
        router: Arc<Router>,
    ) -> Arc<Self> {
        Arc::new(Supervisor {
            factory,
            retry,
            decoder,
            config,
            state: StateMachine::new(),
            transport: RwLock::new(None),
            session,
            registry,
            router,
            close_signal: CancellationToken::new(),
            monitor_handle: std::sync::Mutex::new(None),
        })
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// The session this supervisor replays on reconnect.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The live-query registry this supervisor restores on reconnect.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The notification router backing every [`crate::router::SubscriptionStream`].
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The payload decoder used to extract subscription ids from
    /// `live`/`query` replies.
    pub(crate) fn decoder(&self) -> &dyn PayloadDecoder {
        self.decoder.as_ref()
    }

    /// Fails with [`Error::NotConnected`] unless the state is `Connected`.
    pub(crate) fn require_connected(&self) -> Result<(), Error> {
        let state = self.state.current();
        if state != ConnectionState::Connected {
            return Err(Error::NotConnected(state.as_str()));
        }
        Ok(())
    }

    /// The current transport, if any. Used by the interceptor to issue RPCs;
    /// callers must have already checked [`Supervisor::require_connected`]
    /// since a transport can outlive the `Connected` state briefly during
    /// teardown.
    pub(crate) async fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// Establish the initial connection, retrying per the configured
    /// strategy. On success, spawns the background monitor exactly once.
    pub async fn connect(self: &Arc<Self>, ctx: &Context) -> Result<(), Error> {
        self.state.transition_to(ConnectionState::Connecting)?;

        match self.dial(ctx).await {
            Ok(transport) => {
                *self.transport.write().await = Some(transport);
                self.state.transition_to(ConnectionState::Connected)?;
                if let Some(retry) = &self.retry {
                    retry.reset();
                }
                self.spawn_monitor_once();
                Ok(())
            }
            Err(e) => {
                // Best effort: if the state has already moved on (e.g. a
                // concurrent close), leave it alone.
                let _ = self.state.transition_to(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Construct and connect transports until one succeeds, following the
    /// configured retry strategy (or failing after the first attempt if
    /// none is configured).
    async fn dial(&self, ctx: &Context) -> Result<Arc<dyn Transport>, Error> {
        let mut attempts_made: u32 = 0;

        loop {
            attempts_made += 1;
            let transport: Arc<dyn Transport> = Arc::from(self.factory.new_transport());

            let connect_outcome = ctx.race(transport.connect(ctx)).await?;
            let err = match connect_outcome {
                Ok(()) => return Ok(transport),
                Err(e) => e,
            };

            match &self.retry {
                None => {
                    return Err(Error::InitialConnect {
                        attempts: attempts_made,
                        source: Box::new(err),
                    });
                }
                Some(retry) => {
                    let attempt_index = attempts_made - 1;
                    match retry.next_delay(attempt_index, &err) {
                        RetryDecision::GiveUp => {
                            return Err(Error::InitialConnect {
                                attempts: attempts_made,
                                source: Box::new(err),
                            });
                        }
                        RetryDecision::Retry(delay) => {
                            self.sleep_interruptible(ctx, delay).await?;
                        }
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, cut short by either `ctx`'s own cancellation (and
    /// deadline) or this supervisor's close signal.
    async fn sleep_interruptible(&self, ctx: &Context, delay: Duration) -> Result<(), Error> {
        tokio::select! {
            biased;
            _ = self.close_signal.cancelled() => Err(Error::Closed),
            result = ctx.race(tokio::time::sleep(delay)) => result,
        }
    }

    fn spawn_monitor_once(self: &Arc<Self>) {
        let mut guard = self.monitor_handle.lock().expect("monitor mutex poisoned");
        if guard.is_none() {
            let this = Arc::clone(self);
            *guard = Some(tokio::spawn(this.monitor_loop()));
        }
    }

    async fn monitor_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.close_signal.cancelled() => return,
                _ = ticker.tick() => {
                    let observed_closed = match self.transport.read().await.as_ref() {
                        Some(t) => t.is_closed(),
                        None => true,
                    };
                    if observed_closed {
                        self.reconnect().await;
                    }
                }
            }
        }
    }

    /// One reconnect cycle: dial a fresh transport, replay session state,
    /// restore live queries, then swap the new transport in. Errors at every
    /// step are logged and do not abort the cycle; a failed dial simply
    /// leaves the connection `Disconnected` for the next monitor tick to
    /// retry.
    async fn reconnect(&self) {
        if self.state.transition_to(ConnectionState::Connecting).is_err() {
            // Already `Closing`/`Closed`: nothing to do.
            return;
        }

        let ctx = Context::background();
        let transport = match self.dial(&ctx).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(error = %e, "reconnect failed to establish a transport; will retry next tick");
                let _ = self.state.transition_to(ConnectionState::Disconnected);
                return;
            }
        };

        self.replay_session(transport.as_ref(), &ctx).await;

        if let Err(e) = registry::restore_all(&self.registry, transport.as_ref(), self.decoder.as_ref(), &ctx).await {
            tracing::error!(error = %e, "live query restoration had failures this reconnect cycle");
        }

        self.repoint_routes(&transport).await;

        *self.transport.write().await = Some(transport);
        if self.state.transition_to(ConnectionState::Connected).is_ok() {
            if let Some(retry) = &self.retry {
                retry.reset();
            }
        }
    }

    /// Replay `use`, then `authenticate`, then every `let`, in that order
    /// Each step is best-effort: a failure is logged and replay
    /// continues with the next step, since a session that can't fully
    /// restore is still better served by whatever of it did restore.
    async fn replay_session(&self, transport: &dyn Transport, ctx: &Context) {
        let session = self.session.snapshot();

        if let (Some(namespace), Some(database)) = (&session.namespace, &session.database) {
            let params = Params::new([Value::Str(namespace.clone()), Value::Str(database.clone())]);
            if let Err(e) = transport.send(ctx, "use", params).await {
                tracing::warn!(error = %e, "session replay: use failed");
            }
        }

        if let Some(token) = &session.token {
            let params = Params::new([Value::Str(token.clone())]);
            if let Err(e) = transport.send(ctx, "authenticate", params).await {
                tracing::warn!(error = %e, "session replay: authenticate failed");
            }
        }

        for (key, value) in session.variables.iter() {
            let params = Params::new([Value::Str(key.clone()), value.clone()]);
            if let Err(e) = transport.send(ctx, "let", params).await {
                tracing::warn!(error = %e, key = %key, "session replay: let failed");
            }
        }
    }

    /// After restoration has updated every surviving record's `external_id`,
    /// point each route at the new transport's notification channel for
    /// that id, leaving each [`crate::router::SubscriptionStream`]'s
    /// identity untouched.
    async fn repoint_routes(&self, transport: &Arc<dyn Transport>) {
        for record in self.registry.snapshot() {
            let transport = Arc::clone(transport);
            let external_id = record.external_id.clone();
            let (_, err) = self
                .router
                .setup(
                    &record.internal_id.to_string(),
                    &record.external_id,
                    || async move { transport.live_notifications(&external_id).await },
                )
                .await;
            if let Some(e) = err {
                tracing::warn!(
                    subscription = %record.internal_id,
                    error = %e,
                    "could not re-establish live notifications after reconnect"
                );
            }
        }
    }

    /// Tear the connection down. Idempotent: calling this again after
    /// `Closed` returns [`Error::AlreadyClosed`] without side effects.
    pub async fn close(&self, ctx: &Context) -> Result<(), Error> {
        if self.state.current() == ConnectionState::Closed {
            return Err(Error::AlreadyClosed);
        }
        self.state.transition_to(ConnectionState::Closing)?;
        self.close_signal.cancel();

        let monitor = self.monitor_handle.lock().expect("monitor mutex poisoned").take();
        if let Some(handle) = monitor {
            let _ = ctx.race(handle).await;
        }

        self.router.close().await;

        if let Some(transport) = self.transport.read().await.clone() {
            let _ = ctx.race(transport.close(ctx)).await;
        }

        self.state.transition_to(ConnectionState::Closed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::json_codec::JsonPayloadDecoder;
    use crate::transport::{BoxFuture, ExternalNotifications, RpcResponse};
    use std::sync::atomic::{AtomicU32, AtomicBool, Ordering};

    struct FlakyTransport {
        remaining_failures: AtomicU32,
        closed: AtomicBool,
    }

    impl Transport for FlakyTransport {
        fn connect<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async move {
                if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                    self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                    Err(Error::transport(std::io::Error::other("dial failed")))
                } else {
                    Ok(())
                }
            })
        }

        fn close<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn send<'a>(
            &'a self,
            _ctx: &'a Context,
            _method: &'a str,
            _params: Params,
        ) -> BoxFuture<'a, Result<RpcResponse, Error>> {
            Box::pin(async { Ok(RpcResponse::ok(b"null".to_vec())) })
        }

        fn live_notifications<'a>(&'a self, _external_id: &'a str) -> BoxFuture<'a, Result<ExternalNotifications, Error>> {
            Box::pin(async { Ok(tokio::sync::mpsc::channel(8).1) })
        }

        fn close_live_notifications<'a>(&'a self, _external_id: &'a str) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn supervisor_with(failures: u32, retry: Option<Arc<dyn RetryStrategy>>) -> Arc<Supervisor> {
        let factory = move || -> Box<dyn Transport> {
            Box::new(FlakyTransport {
                remaining_failures: AtomicU32::new(failures),
                closed: AtomicBool::new(false),
            })
        };
        Supervisor::new(
            Arc::new(factory),
            retry,
            Arc::new(JsonPayloadDecoder),
            SupervisorConfig::default(),
            Arc::new(Session::new()),
            Arc::new(Registry::new()),
            Arc::new(Router::default()),
        )
    }

    #[tokio::test]
    async fn connect_succeeds_without_retry_when_first_attempt_works() {
        let supervisor = supervisor_with(0, None);
        supervisor.connect(&Context::background()).await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn connect_fails_immediately_without_a_retry_strategy() {
        let supervisor = supervisor_with(1, None);
        let err = supervisor.connect(&Context::background()).await.unwrap_err();
        assert!(matches!(err, Error::InitialConnect { attempts: 1, .. }));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_until_the_factory_succeeds() {
        use crate::retry::ExponentialBackoff;
        let retry: Arc<dyn RetryStrategy> = Arc::new(
            ExponentialBackoff::new()
                .initial_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(100))
                .with_jitter(false),
        );
        let supervisor = supervisor_with(3, Some(retry));
        supervisor.connect(&Context::background()).await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_max_attempts() {
        use crate::retry::FixedInterval;
        let retry: Arc<dyn RetryStrategy> =
            Arc::new(FixedInterval::new(Duration::from_millis(5)).with_max_attempts(3));
        let supervisor = supervisor_with(u32::MAX, Some(retry));
        let err = supervisor.connect(&Context::background()).await.unwrap_err();
        assert!(matches!(err, Error::InitialConnect { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn close_before_connect_transitions_straight_to_closed() {
        let supervisor = supervisor_with(0, None);
        supervisor.close(&Context::background()).await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_is_not_idempotent_and_reports_already_closed() {
        let supervisor = supervisor_with(0, None);
        supervisor.connect(&Context::background()).await.unwrap();
        supervisor.close(&Context::background()).await.unwrap();
        let err = supervisor.close(&Context::background()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyClosed));
    }
}
