// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Client-side record of the server-side session state: selected
//! namespace/database, auth token, and user-defined variables.
//!
//! Stored behind an [`arc_swap::ArcSwap`] rather than a mutex: readers (the
//! monitor, replaying on reconnect) need a consistent snapshot to iterate
//! over without holding a lock across the `use`/`authenticate`/`let` RPCs,
//! and writers (the interceptor, after each successful mutating call) just
//! swap in a new `Arc` built from a clone of the old one: the same
//! "per-connection session, read far more than written" shape as any
//! `ArcSwap`-backed connection-state struct.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::value::Value;

/// An immutable snapshot of session state. Replay during reconnect walks
/// this in a fixed order: `use`, then `authenticate`, then `let*`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    /// The selected namespace, if any.
    pub namespace: Option<String>,
    /// The selected database, if any.
    pub database: Option<String>,
    /// The current auth token, if any.
    pub token: Option<String>,
    /// User-defined session variables set via `let`.
    pub variables: BTreeMap<String, Value>,
}

/// Tracks the current [`SessionState`] and the mutations the interceptor
/// applies to it.
#[derive(Debug, Default)]
pub struct Session {
    inner: ArcSwap<SessionState>,
}

impl Session {
    /// A fresh, empty session.
    pub fn new() -> Self {
        Session {
            inner: ArcSwap::from_pointee(SessionState::default()),
        }
    }

    /// A consistent snapshot of the current session state, safe to iterate
    /// over without holding any lock.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.inner.load_full()
    }

    /// Record a successful `use(namespace, database)`.
    pub fn set_namespace_database(&self, namespace: String, database: String) {
        self.update(|s| {
            s.namespace = Some(namespace.clone());
            s.database = Some(database.clone());
        });
    }

    /// Record a successful `authenticate`/`sign_in`/`sign_up`.
    pub fn set_token(&self, token: String) {
        self.update(|s| s.token = Some(token.clone()));
    }

    /// Clear the auth token (sign-out). Never invoked automatically on
    /// disconnect: only the caller clears it, and only explicitly.
    pub fn clear_token(&self) {
        self.update(|s| s.token = None);
    }

    /// Record a successful `let(key, value)`.
    pub fn set_variable(&self, key: String, value: Value) {
        self.update(|s| {
            s.variables.insert(key.clone(), value.clone());
        });
    }

    /// Record a successful `unset(key)`.
    pub fn unset_variable(&self, key: &str) {
        self.update(|s| {
            s.variables.remove(key);
        });
    }

    fn update(&self, f: impl Fn(&mut SessionState)) {
        self.inner.rcu(|current| {
            let mut next = (**current).clone();
            f(&mut next);
            next
        });
    }
}
