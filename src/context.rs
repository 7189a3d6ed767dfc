// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A cancellable, deadlined request context.
//!
//! Every public operation on [`crate::client::Client`] takes a [`Context`] so
//! that callers can bound how long they're willing to wait and can cancel a
//! call outright. It wraps a [`CancellationToken`], the same primitive used
//! elsewhere for `shutdown`/`canceller` style signals, plus an optional
//! deadline.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A cancellable, optionally deadlined context passed to every public
/// operation.
#[derive(Clone, Debug)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Context {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that is cancelled after `timeout` elapses.
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    /// Derive a child context that is cancelled either when `self` is
    /// cancelled, or when the returned [`CancellationToken`] is triggered.
    /// Used internally to tie the backoff sleep to both the caller's
    /// context and the client's close signal.
    pub fn child(&self) -> (Context, CancellationToken) {
        let token = self.cancel.child_token();
        let ctx = Context {
            cancel: token.clone(),
            deadline: self.deadline,
        };
        (ctx, token)
    }

    /// Cancel this context and everything derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once this context is cancelled. Ignores the deadline: callers
    /// that also care about a deadline should race against [`Context::race`]
    /// instead.
    pub fn cancelled(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.cancel.cancelled()
    }

    /// True if the context has been cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Race `fut` against cancellation/deadline, returning [`Error::Cancelled`]
    /// if the context finishes first.
    pub async fn race<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::pin!(fut);
        loop {
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep_until(deadline.into()) => return Err(Error::Cancelled),
                        out = &mut fut => return Ok(out),
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        out = &mut fut => return Ok(out),
                    }
                }
            }
        }
    }

    /// Sleep for `duration`, cancellable by this context's cancellation
    /// token (but not by its deadline, which callers are expected to check
    /// separately via [`Context::is_done`]).
    pub async fn sleep_cancellable(&self, duration: Duration) -> Result<(), Error> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
