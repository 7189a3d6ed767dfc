// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The public-facing client: a request interceptor sitting in front of the
//! [`crate::supervisor::Supervisor`], applying session bookkeeping and
//! live-query registration to every call before it reaches the transport.
//!
//! This is the seam between caller and transport: the request interceptor. Every
//! mutating call is split into "do the RPC" and "if it succeeded, record
//! what changed", so the same bookkeeping the interceptor applies up front
//! is exactly what [`crate::supervisor::Supervisor::reconnect`] replays
//! later.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::registry::{self, CreateMethod, Registry, SubscriptionId};
use crate::retry::RetryStrategy;
use crate::router::{Router, SubscriptionStream};
use crate::session::Session;
use crate::state::ConnectionState;
use crate::supervisor::{Supervisor, SupervisorConfig};
use crate::transport::{PayloadDecoder, Transport, TransportFactory};
use crate::value::{Params, Value};

/// Classify a create call so the registry knows how to replay it. Only
/// `live` and `query` with a leading `LIVE SELECT` statement create a
/// subscription; everything else is a plain RPC.
fn classify(method: &str, params: &Params) -> Option<CreateMethod> {
    match method {
        "live" => Some(CreateMethod::Live),
        "query" => {
            let statement = params.first()?.as_str()?;
            statement
                .trim_start()
                .get(..11)
                .is_some_and(|head| head.eq_ignore_ascii_case("live select"))
                .then_some(CreateMethod::Query)
        }
        _ => None,
    }
}

/// Builds a [`Client`].
pub struct ClientBuilder {
    factory: Option<Arc<dyn TransportFactory>>,
    retry: Option<Arc<dyn RetryStrategy>>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    monitor_interval: Duration,
    channel_capacity: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder {
            factory: None,
            retry: None,
            #[cfg(feature = "json-codec")]
            decoder: Some(Arc::new(crate::transport::json_codec::JsonPayloadDecoder)),
            #[cfg(not(feature = "json-codec"))]
            decoder: None,
            monitor_interval: SupervisorConfig::default().monitor_interval,
            channel_capacity: crate::transport::NOTIFICATION_CHANNEL_CAPACITY,
        }
    }
}

impl ClientBuilder {
    /// A builder with no transport factory configured yet. The `json-codec`
    /// feature (on by default) pre-fills a JSON [`PayloadDecoder`]; without
    /// it, [`ClientBuilder::decoder`] must be called before
    /// [`ClientBuilder::build`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Required: how to construct a fresh, not-yet-connected transport for
    /// the initial connect and for every reconnect.
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Optional: how to wait between failed connection attempts. Without
    /// one, the first failure is fatal (no retries).
    pub fn retry_strategy(mut self, retry: impl RetryStrategy + 'static) -> Self {
        self.retry = Some(Arc::new(retry));
        self
    }

    /// Override the payload decoder used to extract subscription ids from
    /// `live`/`query` replies.
    pub fn decoder(mut self, decoder: impl PayloadDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// How often the background monitor checks whether the current
    /// transport is still alive. Defaults to 5 seconds.
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Override the capacity of every caller-facing notification channel.
    /// Clamped up to [`crate::transport::NOTIFICATION_CHANNEL_CAPACITY`],
    /// the minimum every such channel must support; values below it are
    /// raised rather than rejected.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(crate::transport::NOTIFICATION_CHANNEL_CAPACITY);
        self
    }

    /// Build the client. Fails if no transport factory (or, without the
    /// `json-codec` feature, no decoder) was supplied.
    pub fn build(self) -> Result<Client, Error> {
        let factory = self
            .factory
            .ok_or_else(|| Error::Configuration("transport_factory is required".into()))?;
        let decoder = self.decoder.ok_or_else(|| {
            Error::Configuration(
                "a PayloadDecoder is required; enable the json-codec feature or call ClientBuilder::decoder".into(),
            )
        })?;

        let supervisor = Supervisor::new(
            factory,
            self.retry,
            decoder,
            SupervisorConfig {
                monitor_interval: self.monitor_interval,
            },
            Arc::new(Session::new()),
            Arc::new(Registry::new()),
            Arc::new(Router::new(self.channel_capacity)),
        );

        Ok(Client { supervisor })
    }
}

/// A reliable RPC client: automatic reconnection, session replay, and
/// live-query restoration, sitting in front of a caller-supplied
/// [`Transport`].
pub struct Client {
    supervisor: Arc<Supervisor>,
}

impl Client {
    /// Start from [`ClientBuilder::new`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Establish the initial connection, retrying per the configured
    /// strategy.
    pub async fn connect(&self, ctx: &Context) -> Result<(), Error> {
        self.supervisor.connect(ctx).await
    }

    /// Tear the connection down. Idempotent in the sense that calling it
    /// again after `Closed` returns [`Error::AlreadyClosed`] rather than
    /// panicking or hanging, but it is not silently swallowed: check the
    /// result if that distinction matters to the caller.
    pub async fn close(&self, ctx: &Context) -> Result<(), Error> {
        self.supervisor.close(ctx).await
    }

    /// True once the client has reached the terminal `Closed` state.
    pub fn is_closed(&self) -> bool {
        self.supervisor.state() == ConnectionState::Closed
    }

    /// Select a namespace and database. Replayed on every reconnect.
    pub async fn use_ns(
        &self,
        ctx: &Context,
        namespace: impl Into<String>,
        database: impl Into<String>,
    ) -> Result<(), Error> {
        let namespace = namespace.into();
        let database = database.into();
        self.send(
            ctx,
            "use",
            Params::new([Value::Str(namespace.clone()), Value::Str(database.clone())]),
        )
        .await?;
        self.supervisor.session().set_namespace_database(namespace, database);
        Ok(())
    }

    /// Authenticate with an already-issued token. Replayed on every
    /// reconnect until [`Client::invalidate`] is called.
    pub async fn authenticate(&self, ctx: &Context, token: impl Into<String>) -> Result<(), Error> {
        let token = token.into();
        self.send(ctx, "authenticate", Params::new([Value::Str(token.clone())]))
            .await?;
        self.supervisor.session().set_token(token);
        Ok(())
    }

    /// Sign in with credentials, returning the raw (still encoded) reply.
    /// Unlike [`Client::authenticate`], the resulting token is not recorded
    /// automatically: decode it with the caller's codec and pass it to
    /// [`Client::authenticate`] to have it replayed on reconnect.
    pub async fn sign_in(&self, ctx: &Context, credentials: Params) -> Result<Vec<u8>, Error> {
        self.send(ctx, "signin", credentials).await
    }

    /// Sign up with credentials. See [`Client::sign_in`] for how to record
    /// the resulting token.
    pub async fn sign_up(&self, ctx: &Context, credentials: Params) -> Result<Vec<u8>, Error> {
        self.send(ctx, "signup", credentials).await
    }

    /// Invalidate the current session token, both on the server and
    /// locally. Unlike a disconnect, this is the only thing that clears a
    /// recorded token.
    pub async fn invalidate(&self, ctx: &Context) -> Result<(), Error> {
        self.send(ctx, "invalidate", Params::none()).await?;
        self.supervisor.session().clear_token();
        Ok(())
    }

    /// Set a session variable. Replayed on every reconnect.
    pub async fn let_var(&self, ctx: &Context, key: impl Into<String>, value: Value) -> Result<(), Error> {
        let key = key.into();
        self.send(ctx, "let", Params::new([Value::Str(key.clone()), value.clone()]))
            .await?;
        self.supervisor.session().set_variable(key, value);
        Ok(())
    }

    /// Remove a session variable.
    pub async fn unset_var(&self, ctx: &Context, key: impl Into<String>) -> Result<(), Error> {
        let key = key.into();
        self.send(ctx, "unset", Params::new([Value::Str(key.clone())])).await?;
        self.supervisor.session().unset_variable(&key);
        Ok(())
    }

    /// Send an arbitrary RPC and return its raw result payload.
    ///
    /// If `method`/`params` classify as a subscription-create (a `live`
    /// call, or a `query` call whose first parameter is a `LIVE SELECT`
    /// statement), the resulting subscription is registered and its route
    /// set up before this returns, exactly as [`Client::send_and_track`]
    /// would do it; the difference is that a failure to register doesn't
    /// fail the call; it's logged and the caller still gets the payload
    /// back. Use [`Client::send_and_track`] when the stream itself is
    /// needed in the same call, or when a registration failure should be
    /// treated as the call having failed.
    pub async fn send(&self, ctx: &Context, method: &str, params: Params) -> Result<Vec<u8>, Error> {
        let Some(create_method) = classify(method, &params) else {
            return self.send_forward(ctx, method, params).await;
        };

        let (payload, extraction) = self
            .create_subscription_reply(ctx, create_method, method, params.clone())
            .await?;

        match extraction {
            Ok(external_id) => {
                if let Err(e) = self.track_subscription(create_method, params, external_id).await {
                    tracing::warn!(
                        method,
                        error = %e,
                        "could not register the new subscription for restoration"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    method,
                    error = %e,
                    "could not extract a subscription id from a successful create reply; \
                     subscription will not survive a reconnect"
                );
            }
        }

        Ok(payload)
    }

    /// Send a `live` call, or a `query` call whose first parameter is a
    /// `LIVE SELECT` statement, and register the resulting subscription so
    /// it survives reconnects. Returns the stable [`SubscriptionId`] and its
    /// [`SubscriptionStream`].
    ///
    /// Returns [`Error::Configuration`] if `method`/`params` wouldn't create
    /// a subscription at all; call [`Client::send`] for those.
    pub async fn send_and_track(
        &self,
        ctx: &Context,
        method: &str,
        params: Params,
    ) -> Result<(SubscriptionId, SubscriptionStream), Error> {
        let create_method = classify(method, &params)
            .ok_or_else(|| Error::Configuration(format!("`{method}` does not create a live subscription")))?;

        let (_payload, extraction) = self
            .create_subscription_reply(ctx, create_method, method, params.clone())
            .await?;
        self.track_subscription(create_method, params, extraction?).await
    }

    /// Forward a subscription-create call and attempt to extract its
    /// external id from the reply, without touching the registry or
    /// router. Shared by [`Client::send`] and [`Client::send_and_track`] so
    /// both apply the same bookkeeping to a successful create.
    async fn create_subscription_reply(
        &self,
        ctx: &Context,
        create_method: CreateMethod,
        method: &str,
        params: Params,
    ) -> Result<(Vec<u8>, Result<String, Error>), Error> {
        let payload = self.send_forward(ctx, method, params).await?;
        let extraction = registry::extract_subscription_id(self.decoder(), create_method, &payload);
        Ok((payload, extraction))
    }

    /// Register a successfully-extracted subscription id in the registry
    /// and set up its route, returning the stable id and stream.
    async fn track_subscription(
        &self,
        create_method: CreateMethod,
        params: Params,
        external_id: String,
    ) -> Result<(SubscriptionId, SubscriptionStream), Error> {
        let internal_id = SubscriptionId(
            Uuid::parse_str(&external_id).map_err(|e| Error::IdExtraction(e.to_string()))?,
        );

        self.supervisor.registry().insert(internal_id, create_method, params);

        let transport = self.current_transport().await?;
        let (stream, err) = self
            .supervisor
            .router()
            .setup(&internal_id.to_string(), &external_id, || {
                let transport = Arc::clone(&transport);
                let external_id = external_id.clone();
                async move { transport.live_notifications(&external_id).await }
            })
            .await;

        if let Some(e) = err {
            return Err(e);
        }
        Ok((internal_id, stream))
    }

    /// The notification stream for a subscription created by
    /// [`Client::send_and_track`]. Stable across reconnects: the same
    /// `id` always yields a stream with the same identity.
    pub async fn live_notifications(&self, id: SubscriptionId) -> Result<SubscriptionStream, Error> {
        let record = self
            .supervisor
            .registry()
            .get(id)
            .ok_or(Error::UnknownSubscription(id))?;

        let (stream, _) = self
            .supervisor
            .router()
            .setup(&id.to_string(), &record.external_id, || async {
                // The route already exists with this external id (it was
                // installed by `send_and_track` or by a reconnect), so the
                // fast path in `Router::setup` returns before this ever runs.
                Err(Error::Configuration("no route exists for this subscription".into()))
            })
            .await;
        Ok(stream)
    }

    /// Stop a live subscription: ask the server to stop delivering
    /// notifications for it, then drop it from the registry and router.
    /// Local cleanup happens even if the remote call fails.
    pub async fn close_live_notifications(&self, ctx: &Context, id: SubscriptionId) -> Result<(), Error> {
        let record = self
            .supervisor
            .registry()
            .get(id)
            .ok_or(Error::UnknownSubscription(id))?;

        self.supervisor.registry().remove(id);
        self.supervisor.router().remove(&id.to_string()).await;

        if let Some(transport) = self.supervisor.current_transport().await {
            transport.close_live_notifications(&record.external_id).await?;
        }
        Ok(())
    }

    fn decoder(&self) -> &dyn PayloadDecoder {
        self.supervisor.decoder()
    }

    async fn current_transport(&self) -> Result<Arc<dyn Transport>, Error> {
        self.supervisor
            .current_transport()
            .await
            .ok_or_else(|| Error::NotConnected(self.supervisor.state().as_str()))
    }

    /// Forward a call to the current transport and unwrap its result,
    /// without any classification or registry bookkeeping.
    async fn send_forward(&self, ctx: &Context, method: &str, params: Params) -> Result<Vec<u8>, Error> {
        self.supervisor.require_connected()?;
        let transport = self.current_transport().await?;
        let response = transport.send(ctx, method, params).await?;
        response.result.map_err(Error::Rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedInterval;
    use crate::transport::{BoxFuture, ExternalNotifications, RpcResponse};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    struct MockTransport {
        closed: AtomicBool,
        live_tx: AsyncMutex<Option<mpsc::Sender<crate::transport::Notification>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            MockTransport {
                closed: AtomicBool::new(false),
                live_tx: AsyncMutex::new(None),
            }
        }
    }

    impl Transport for MockTransport {
        fn connect<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        }

        fn close<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn send<'a>(&'a self, _ctx: &'a Context, method: &'a str, params: Params) -> BoxFuture<'a, Result<RpcResponse, Error>> {
            Box::pin(async move {
                match method {
                    "live" => Ok(RpcResponse::ok(
                        serde_json::to_vec(&serde_json::Value::String("11111111-1111-1111-1111-111111111111".into())).unwrap(),
                    )),
                    "query" => {
                        let _ = params;
                        Ok(RpcResponse::ok(
                            serde_json::to_vec(&serde_json::json!([
                                { "status": "OK", "time": "0ms", "result": "22222222-2222-2222-2222-222222222222" }
                            ]))
                            .unwrap(),
                        ))
                    }
                    _ => Ok(RpcResponse::ok(b"null".to_vec())),
                }
            })
        }

        fn live_notifications<'a>(&'a self, _external_id: &'a str) -> BoxFuture<'a, Result<ExternalNotifications, Error>> {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(8);
                *self.live_tx.lock().await = Some(tx);
                Ok(rx)
            })
        }

        fn close_live_notifications<'a>(&'a self, _external_id: &'a str) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    async fn connected_client() -> Client {
        let client = Client::builder()
            .transport_factory(|| -> Box<dyn Transport> { Box::new(MockTransport::new()) })
            .retry_strategy(FixedInterval::new(Duration::from_millis(1)))
            .build()
            .unwrap();
        client.connect(&Context::background()).await.unwrap();
        client
    }

    #[test]
    fn builder_requires_a_transport_factory() {
        let err = ClientBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let client = Client::builder()
            .transport_factory(|| -> Box<dyn Transport> { Box::new(MockTransport::new()) })
            .build()
            .unwrap();
        let err = client.send(&Context::background(), "ping", Params::none()).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[tokio::test]
    async fn use_ns_records_session_state() {
        let client = connected_client().await;
        client.use_ns(&Context::background(), "n", "d").await.unwrap();
        let snap = client.supervisor.session().snapshot();
        assert_eq!(snap.namespace.as_deref(), Some("n"));
        assert_eq!(snap.database.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn live_creates_a_tracked_subscription_and_delivers_notifications() {
        let client = connected_client().await;
        let (id, stream) = client
            .send_and_track(&Context::background(), "live", Params::new([Value::Str("table".into())]))
            .await
            .unwrap();

        let record = client.supervisor.registry().get(id).unwrap();
        assert_eq!(record.external_id, "11111111-1111-1111-1111-111111111111");

        let transport = client.current_transport().await.unwrap();
        // Downcasting isn't available on `dyn Transport`; reach the mock's
        // sender indirectly by asking for the stream again through the
        // public API (exercises the fast path in `Router::setup`).
        let again = client.live_notifications(id).await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&stream_rx_ptr(&stream), &stream_rx_ptr(&again)));
        let _ = transport;
    }

    #[tokio::test]
    async fn send_and_track_rejects_non_live_calls() {
        let client = connected_client().await;
        let err = client
            .send_and_track(&Context::background(), "select", Params::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn plain_send_of_a_live_call_registers_a_tracked_subscription() {
        let client = connected_client().await;
        let payload = client
            .send(&Context::background(), "live", Params::new([Value::Str("table".into())]))
            .await
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<String>(&payload).unwrap(),
            "11111111-1111-1111-1111-111111111111"
        );

        let id = SubscriptionId(Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap());
        // `live_notifications` succeeds only if `send` already registered the
        // subscription; an unregistered id returns `UnknownSubscription`.
        client.live_notifications(id).await.unwrap();
    }

    #[tokio::test]
    async fn close_live_notifications_is_idempotent_after_first_close() {
        let client = connected_client().await;
        let (id, _stream) = client
            .send_and_track(&Context::background(), "live", Params::new([Value::Str("table".into())]))
            .await
            .unwrap();

        client.close_live_notifications(&Context::background(), id).await.unwrap();
        let err = client
            .close_live_notifications(&Context::background(), id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSubscription(_)));
    }

    fn stream_rx_ptr(stream: &SubscriptionStream) -> std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<crate::transport::Notification>>> {
        stream.internal_handle()
    }
}
