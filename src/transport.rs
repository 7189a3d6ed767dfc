// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The abstract collaborator this crate is built around: a transport capable
//! of sending a single RPC and delivering asynchronous notifications.
//!
//! Concrete transports (a real WebSocket client, an HTTP long-poll
//! fallback, a CBOR-wire implementation) are deliberately out of scope here;
//! this module only defines the boundary: an object-safe trait over boxed
//! futures, so it stays dyn-compatible with no generics in its signatures.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::Error;
use crate::value::Params;

/// A boxed, `Send` future, used throughout the transport boundary so that
/// [`Transport`] stays object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The default, and minimum, capacity of every caller-facing notification
/// channel the router creates. [`crate::client::ClientBuilder::channel_capacity`]
/// can raise it; transports themselves are free to use a different capacity
/// for their own internal channel, since the core only requires that it
/// behaves like a bounded mpsc channel.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;

/// A successful or failed reply to a single RPC call.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    /// The request id the transport correlated this reply to, if it
    /// exposes one (the core never needs to correlate this itself; the
    /// transport already did that).
    pub request_id: Option<String>,
    /// `Ok` with the opaque result payload on success, `Err` with the
    /// remote error message otherwise.
    pub result: Result<Vec<u8>, String>,
}

impl RpcResponse {
    /// A successful response carrying `payload`.
    pub fn ok(payload: Vec<u8>) -> Self {
        RpcResponse {
            request_id: None,
            result: Ok(payload),
        }
    }

    /// A failed response carrying the remote's error message.
    pub fn error(message: impl Into<String>) -> Self {
        RpcResponse {
            request_id: None,
            result: Err(message.into()),
        }
    }

    /// True if this reply represents an RPC-level error.
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }
}

/// A single live-query notification, keyed by the server's *current*
/// (external) subscription id. The core only inspects `subscription_id` to
/// route it; `action` and `payload` pass through untouched.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The external subscription id this notification belongs to.
    pub subscription_id: String,
    /// The kind of change (`CREATE`, `UPDATE`, `DELETE`, ...); opaque to the
    /// core.
    pub action: String,
    /// The opaque notification payload.
    pub payload: Vec<u8>,
}

/// The stream of notifications for one (external) subscription, as handed
/// back by the transport.
pub type ExternalNotifications = mpsc::Receiver<Notification>;

/// The collaborator this crate wraps: a single request/response connection
/// plus out-of-band notification delivery.
///
/// A `Transport` instance represents one physical connection. The
/// supervisor discards it on disconnect and asks the
/// [`TransportFactory`] for a fresh one; it never reconnects the same
/// instance in place.
pub trait Transport: Send + Sync {
    /// Establish the underlying connection. Called once, right after the
    /// transport is constructed by the factory.
    fn connect<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>>;

    /// Gracefully tear down the connection.
    fn close<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, Result<(), Error>>;

    /// Perform a single RPC call and wait for its reply.
    fn send<'a>(
        &'a self,
        ctx: &'a Context,
        method: &'a str,
        params: Params,
    ) -> BoxFuture<'a, Result<RpcResponse, Error>>;

    /// Obtain the notification stream for a subscription the transport
    /// itself just created or restored, identified by its *external*
    /// (server-assigned) id.
    fn live_notifications<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<ExternalNotifications, Error>>;

    /// Ask the server to stop delivering notifications for `external_id`.
    fn close_live_notifications<'a>(&'a self, external_id: &'a str) -> BoxFuture<'a, Result<(), Error>>;

    /// True if the transport has observed the connection go away. Polled by
    /// the supervisor's monitor loop; a transport that can push this
    /// information (e.g. via a `Notify`) is still polled, just cheaply.
    fn is_closed(&self) -> bool;
}

/// Creates fresh, not-yet-connected [`Transport`] instances.
///
/// The supervisor calls this once for the initial connect and once per
/// reconnect attempt; it never tries to resurrect an old instance.
pub trait TransportFactory: Send + Sync {
    /// Construct a new transport. The returned transport is not yet
    /// connected: the caller must call [`Transport::connect`] on it.
    fn new_transport(&self) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Box<dyn Transport> + Send + Sync,
{
    fn new_transport(&self) -> Box<dyn Transport> {
        (self)()
    }
}

/// Decodes the two response shapes the core needs to understand: a single
/// subscription id (for `live`) and a one-element array of query results
/// whose `result` is a subscription id (for `query` with `LIVE SELECT`).
///
/// This is the codec boundary: a real deployment plugs in its CBOR decoder
/// here; the crate ships only a JSON-based demonstration impl (see
/// [`json_codec`]), gated behind the `json-codec` feature, since the wire
/// codec itself is out of scope.
pub trait PayloadDecoder: Send + Sync {
    /// Decode a `live` RPC's result payload into the subscription id it
    /// created.
    fn decode_live_id(&self, payload: &[u8]) -> Result<String, Error>;

    /// Decode a `query` RPC's result payload (a one-element array of
    /// `{status, time, result}`) into the subscription id carried in its
    /// `result` field.
    fn decode_query_live_id(&self, payload: &[u8]) -> Result<String, Error>;
}

#[cfg(feature = "json-codec")]
pub mod json_codec {
    //! A demonstration [`PayloadDecoder`](super::PayloadDecoder) built on
    //! `serde_json`. Real
    //! deployments decode CBOR instead; this exists so the crate's tests
    //! and doctests have something concrete to exercise.

    use serde::Deserialize;
    use serde_json::Value as Json;

    use super::PayloadDecoder;
    use crate::error::Error;

    /// The JSON-based [`PayloadDecoder`](super::PayloadDecoder).
    #[derive(Debug, Default, Clone, Copy)]
    pub struct JsonPayloadDecoder;

    #[derive(Deserialize)]
    struct QueryResult {
        #[allow(dead_code)]
        status: String,
        #[allow(dead_code)]
        time: Option<String>,
        result: Json,
    }

    fn id_from_json(value: &Json) -> Result<String, Error> {
        match value {
            Json::String(s) => Ok(s.clone()),
            other => Err(Error::Decode(format!(
                "expected a subscription id string, got {other}"
            ))),
        }
    }

    impl PayloadDecoder for JsonPayloadDecoder {
        fn decode_live_id(&self, payload: &[u8]) -> Result<String, Error> {
            let value: Json =
                serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            id_from_json(&value)
        }

        fn decode_query_live_id(&self, payload: &[u8]) -> Result<String, Error> {
            let results: Vec<QueryResult> =
                serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            let first = results
                .into_iter()
                .next()
                .ok_or_else(|| Error::Decode("expected a one-element query result array".into()))?;
            id_from_json(&first.result)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn decodes_live_id() {
            let decoder = JsonPayloadDecoder;
            let payload = serde_json::to_vec(&Json::String("abc-123".into())).unwrap();
            assert_eq!(decoder.decode_live_id(&payload).unwrap(), "abc-123");
        }

        #[test]
        fn decodes_query_live_id_from_result_array() {
            let decoder = JsonPayloadDecoder;
            let payload = serde_json::to_vec(&serde_json::json!([
                { "status": "OK", "time": "1ms", "result": "abc-123" }
            ]))
            .unwrap();
            assert_eq!(decoder.decode_query_live_id(&payload).unwrap(), "abc-123");
        }

        #[test]
        fn rejects_empty_query_result_array() {
            let decoder = JsonPayloadDecoder;
            let payload = serde_json::to_vec(&serde_json::json!([])).unwrap();
            assert!(decoder.decode_query_live_id(&payload).is_err());
        }
    }
}
