// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The error type shared by every module in this crate.

/// Errors that can be produced by the reconnecting RPC client core.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `connect` was called without a transport factory, or some other
    /// required piece of configuration is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The initial `connect` exhausted its retry strategy (or had none
    /// configured) without establishing a connection.
    #[error("failed to connect after {attempts} attempts: {source}")]
    InitialConnect {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The last error returned by the transport.
        #[source]
        source: Box<Error>,
    },

    /// An operation attempted an illegal connection-state transition.
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// The state the connection was in.
        from: &'static str,
        /// The state that was requested.
        to: &'static str,
    },

    /// No RPC may be sent unless the connection is `Connected`.
    #[error("cannot send a request while the connection is {0}")]
    NotConnected(&'static str),

    /// The supplied context was cancelled or its deadline elapsed.
    #[error("context cancelled")]
    Cancelled,

    /// The client was closed (or dropped) while the call was in flight.
    #[error("client is closed")]
    Closed,

    /// `close` was called more than once after the client reached `Closed`.
    #[error("client is already closed")]
    AlreadyClosed,

    /// An error returned by the underlying transport or by the remote end.
    #[error("transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The remote end replied with an RPC-level error (as opposed to a
    /// transport failure).
    #[error("rpc error: {0}")]
    Rpc(String),

    /// `live_notifications` or `close_live_notifications` was called with an
    /// id that is not present in the live-query registry.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(crate::registry::SubscriptionId),

    /// A subscription's id could not be extracted from an otherwise
    /// successful create reply (first occurrence only is reported here; see
    /// [`Error::Restoration`] for the reconnect-cycle variant).
    #[error("could not extract a subscription id from the create response: {0}")]
    IdExtraction(String),

    /// One or more live queries failed to restore after a reconnect because
    /// their new subscription id could not be extracted. Restoration still
    /// proceeds for the remaining entries; see `DESIGN.md` for the rationale.
    #[error("{} live quer{} failed to restore on reconnect: id extraction failed for {failed:?}", failed.len(), if failed.len() == 1 { "y" } else { "ies" })]
    Restoration {
        /// The subscriptions whose restoration could not be completed.
        failed: Vec<crate::registry::SubscriptionId>,
    },

    /// The codec could not decode a payload into the shape that was expected.
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    pub(crate) fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport(Box::new(err))
    }
}
