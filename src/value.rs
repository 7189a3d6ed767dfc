// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Opaque RPC values.
//!
//! The core never interprets query results and deliberately does not carry
//! a full value model the way a real driver would: it only needs to tell a
//! string parameter apart from everything else (to classify `LIVE SELECT`
//! queries, see [`crate::client::Client::send_and_track`]) and to store parameters
//! verbatim for later replay. Everything that isn't a string is carried as
//! already-encoded bytes, which is what a caller-supplied codec produces.

use std::fmt;

/// A single RPC parameter or session-variable value.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// A UTF-8 string parameter, e.g. a query statement or a token.
    Str(String),
    /// Anything else, already encoded by the caller's codec.
    Opaque(Vec<u8>),
}

impl Value {
    /// Returns the string if this value is [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Opaque(_) => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Opaque(b) => f.debug_tuple("Opaque").field(&b.len()).finish(),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Opaque(b)
    }
}

/// An ordered, opaque parameter list passed to [`crate::transport::Transport::send`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(pub Vec<Value>);

impl Params {
    /// An empty parameter list.
    pub fn none() -> Self {
        Params(Vec::new())
    }

    /// Build a parameter list from any iterable of values.
    pub fn new<I: IntoIterator<Item = Value>>(values: I) -> Self {
        Params(values.into_iter().collect())
    }

    /// The first parameter, if any.
    pub fn first(&self) -> Option<&Value> {
        self.0.first()
    }
}
