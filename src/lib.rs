// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A reliable RPC client core for a document/graph database, wrapping a
//! plain request/response transport (a WebSocket connection, in the
//! reference deployment) with three guarantees that survive a dropped
//! connection:
//!
//! - automatic reconnection, driven by a pluggable [`retry::RetryStrategy`];
//! - replay of per-connection server-side session state (selected
//!   namespace/database, auth token, `let`-defined variables);
//! - restoration of live-query subscriptions, with a stable
//!   caller-visible identity even though the server assigns a fresh one on
//!   every reconnect.
//!
//! Everything else a real deployment needs: the wire codec, the actual
//! WebSocket implementation, an HTTP transport variant, a CLI, is
//! deliberately out of scope. This crate consumes an abstract
//! [`transport::Transport`] and [`transport::PayloadDecoder`] and leaves
//! those collaborators to the caller. See [`client::Client`] for the public
//! entry point.
//!
//! ```no_run
//! use reconnecting_db_client::{Client, Context};
//! use reconnecting_db_client::retry::ExponentialBackoff;
//! # use reconnecting_db_client::transport::{Transport, TransportFactory};
//! # fn make_transport() -> Box<dyn Transport> { unimplemented!() }
//!
//! # async fn run() -> Result<(), reconnecting_db_client::Error> {
//! let client = Client::builder()
//!     .transport_factory(make_transport)
//!     .retry_strategy(ExponentialBackoff::new())
//!     .build()?;
//!
//! client.connect(&Context::background()).await?;
//! client.use_ns(&Context::background(), "my_ns", "my_db").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod registry;
pub mod retry;
pub mod router;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod value;

pub use client::{Client, ClientBuilder};
pub use context::Context;
pub use error::Error;
pub use registry::SubscriptionId;
pub use router::SubscriptionStream;
pub use state::ConnectionState;
pub use value::{Params, Value};
