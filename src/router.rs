// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The notification router: per-subscription relay from a transient,
//! server-assigned channel to a stable, caller-visible one.
//!
//! This is the component that makes reconnection invisible to a caller
//! holding a [`SubscriptionStream`]: the `Arc` it wraps never changes, only
//! what feeds it does: "stable identity over changing identity".

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::error::Error;
use crate::transport::{ExternalNotifications, Notification, NOTIFICATION_CHANNEL_CAPACITY};

/// A cheaply-clonable, stable handle to one subscription's notification
/// stream. Its identity (the `Arc` address) never changes for the life of
/// the subscription, even across reconnects that replace the underlying
/// server-side channel.
#[derive(Clone)]
pub struct SubscriptionStream {
    rx: Arc<AsyncMutex<mpsc::Receiver<Notification>>>,
}

impl SubscriptionStream {
    /// Await the next notification. Returns `None` once the route has been
    /// removed (subscription closed, or the whole router closed).
    pub async fn recv(&self) -> Option<Notification> {
        self.rx.lock().await.recv().await
    }

    /// The underlying receiver handle, for identity comparisons in tests
    /// (invariant 2: the internal channel never changes across a reconnect).
    #[cfg(test)]
    pub(crate) fn internal_handle(&self) -> Arc<AsyncMutex<mpsc::Receiver<Notification>>> {
        Arc::clone(&self.rx)
    }
}

struct Relay {
    stop: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

struct Route {
    external_id: String,
    internal_tx: mpsc::Sender<Notification>,
    stream: SubscriptionStream,
    relay: Option<Relay>,
}

/// Holds one route per active internal subscription id and enforces that
/// at most one relay task runs per route at any instant.
pub struct Router {
    routes: std::sync::Mutex<HashMap<String, Route>>,
    active_relays: Arc<AtomicUsize>,
    channel_capacity: usize,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(NOTIFICATION_CHANNEL_CAPACITY)
    }
}

impl Router {
    /// A fresh, empty router whose internal notification channels are
    /// created with the given capacity.
    pub fn new(channel_capacity: usize) -> Self {
        Router {
            routes: std::sync::Mutex::new(HashMap::new()),
            active_relays: Arc::new(AtomicUsize::new(0)),
            channel_capacity,
        }
    }

    /// The number of relay tasks currently running. Exposed for tests that
    /// verify invariant 3 (at most one relay per route, and here: the
    /// total never exceeds the number of distinct routes).
    pub fn active_relay_count(&self) -> usize {
        self.active_relays.load(Ordering::SeqCst)
    }

    /// Ensure a route exists for `internal_id` feeding from `external_id`,
    /// obtaining the external channel from `provider` if a relay needs to
    /// be (re)started. Always returns the route's stable
    /// [`SubscriptionStream`]; if `provider` fails, the stream is still
    /// returned (callers can still drain whatever was already buffered)
    /// alongside the error.
    pub async fn setup<F, Fut>(
        &self,
        internal_id: &str,
        external_id: &str,
        provider: F,
    ) -> (SubscriptionStream, Option<Error>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ExternalNotifications, Error>>,
    {
        let needs_relay = {
            let routes = self.routes.lock().expect("router mutex poisoned");
            match routes.get(internal_id) {
                Some(route) => route.external_id != external_id,
                None => true,
            }
        };

        if !needs_relay {
            let routes = self.routes.lock().expect("router mutex poisoned");
            return (routes[internal_id].stream.clone(), None);
        }

        // Stop any relay already running for this route before installing
        // the new external channel, so exactly one relay is ever live.
        self.stop_relay(internal_id).await;

        let external = match provider().await {
            Ok(external) => external,
            Err(e) => {
                let stream = self.ensure_stream(internal_id);
                return (stream, Some(e));
            }
        };

        let stream = self.ensure_stream(internal_id);
        self.start_relay(internal_id, external_id, external);
        (stream, None)
    }

    /// Remove a route: stop its relay, close the internal channel, drop
    /// the entry. A no-op if the route doesn't exist.
    pub async fn remove(&self, internal_id: &str) {
        self.stop_relay(internal_id).await;
        self.routes
            .lock()
            .expect("router mutex poisoned")
            .remove(internal_id);
    }

    /// Remove every route. Called once, from `Supervisor::close`.
    pub async fn close(&self) {
        let ids: Vec<String> = self
            .routes
            .lock()
            .expect("router mutex poisoned")
            .keys()
            .cloned()
            .collect();
        for id in ids {
            self.remove(&id).await;
        }
    }

    fn ensure_stream(&self, internal_id: &str) -> SubscriptionStream {
        let mut routes = self.routes.lock().expect("router mutex poisoned");
        if let Some(route) = routes.get(internal_id) {
            return route.stream.clone();
        }
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let stream = SubscriptionStream {
            rx: Arc::new(AsyncMutex::new(rx)),
        };
        routes.insert(
            internal_id.to_string(),
            Route {
                external_id: String::new(),
                internal_tx: tx,
                stream: stream.clone(),
                relay: None,
            },
        );
        stream
    }

    fn start_relay(&self, internal_id: &str, external_id: &str, mut external: ExternalNotifications) {
        let stop = Arc::new(Notify::new());
        let stop_for_task = stop.clone();
        let active_relays = self.active_relays.clone();

        let internal_tx = {
            let mut routes = self.routes.lock().expect("router mutex poisoned");
            let route = routes.get_mut(internal_id).expect("route just ensured");
            route.external_id = external_id.to_string();
            route.internal_tx.clone()
        };

        let internal_id_owned = internal_id.to_string();
        let task = tokio::spawn(async move {
            active_relays.fetch_add(1, Ordering::SeqCst);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_for_task.notified() => break,
                    notif = external.recv() => {
                        let Some(notif) = notif else { break };
                        match internal_tx.try_send(notif) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!(
                                    subscription = %internal_id_owned,
                                    "dropping live-query notification: caller channel is full"
                                );
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            active_relays.fetch_sub(1, Ordering::SeqCst);
        });

        let mut routes = self.routes.lock().expect("router mutex poisoned");
        if let Some(route) = routes.get_mut(internal_id) {
            route.relay = Some(Relay { stop, task });
        } else {
            task.abort();
        }
    }

    async fn stop_relay(&self, internal_id: &str) {
        let relay = {
            let mut routes = self.routes.lock().expect("router mutex poisoned");
            routes.get_mut(internal_id).and_then(|r| r.relay.take())
        };
        if let Some(relay) = relay {
            relay.stop.notify_one();
            let _ = relay.task.await;
        }
    }
}
