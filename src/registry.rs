// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The live-query registry: what subscriptions currently exist, and how to
//! re-create them on a fresh transport after reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::Error;
use crate::transport::{PayloadDecoder, Transport};
use crate::value::Params;
use crate::context::Context;

/// A stable identifier for a live subscription, exposed to callers. Never
/// changes for the life of the subscription, unlike the server-assigned
/// external id it's backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The RPC verb a live subscription was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMethod {
    /// `live`: subscribe directly to a table.
    Live,
    /// `query` with a leading `LIVE SELECT` statement.
    Query,
}

impl CreateMethod {
    /// The literal method name sent to the transport.
    pub fn as_str(self) -> &'static str {
        match self {
            CreateMethod::Live => "live",
            CreateMethod::Query => "query",
        }
    }
}

/// One active subscription: how it was created, and its current
/// server-assigned id.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    /// The stable id the caller uses.
    pub internal_id: SubscriptionId,
    /// The id the server currently recognizes this subscription by.
    pub external_id: String,
    /// The RPC verb used to create it, for replay.
    pub method: CreateMethod,
    /// The exact parameters used at creation, for replay.
    pub params: Params,
}

/// Records every active live subscription and knows how to restore them on
/// a new transport after reconnect.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<SubscriptionId, SubscriptionRecord>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a newly created subscription. `internal_id` and
    /// `external_id` are the same value at creation time; they only
    /// diverge after the first restoration.
    pub fn insert(&self, id: SubscriptionId, method: CreateMethod, params: Params) {
        self.entries.lock().expect("registry mutex poisoned").insert(
            id,
            SubscriptionRecord {
                internal_id: id,
                external_id: id.to_string(),
                method,
                params,
            },
        );
    }

    /// The record for `id`, if it exists.
    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionRecord> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .get(&id)
            .cloned()
    }

    /// Drop the entry for `id`. A no-op if it doesn't exist.
    pub fn remove(&self, id: SubscriptionId) {
        self.entries.lock().expect("registry mutex poisoned").remove(&id);
    }

    /// A point-in-time copy of every record, used as the basis for
    /// restoration: the registry lock is never held while the restoration
    /// RPCs (which involve I/O) are in flight.
    pub fn snapshot(&self) -> Vec<SubscriptionRecord> {
        self.entries
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    fn set_external_id(&self, id: SubscriptionId, external_id: String) {
        if let Some(record) = self.entries.lock().expect("registry mutex poisoned").get_mut(&id) {
            record.external_id = external_id;
        }
    }
}

/// The outcome of extracting a subscription id from a `live`/`query` reply.
pub(crate) fn extract_subscription_id(
    decoder: &dyn PayloadDecoder,
    method: CreateMethod,
    payload: &[u8],
) -> Result<String, Error> {
    match method {
        CreateMethod::Live => decoder.decode_live_id(payload),
        CreateMethod::Query => decoder.decode_query_live_id(payload),
    }
}

/// Re-issue every registered subscription over `transport`, updating each
/// record's `external_id` on success. Entries that fail with a transport or
/// RPC error are logged and skipped; the RPC itself always runs for every
/// entry regardless of earlier failures (an id-extraction failure does not
/// stop restoration of the remaining entries: see `DESIGN.md` for the
/// rationale behind aggregating failures instead of failing fast).
///
/// Returns `Ok(())` if every entry either restored successfully or failed
/// for a reason other than id extraction; returns
/// [`Error::Restoration`] naming every entry whose id could not be
/// extracted, once restoration of all entries has been attempted.
pub async fn restore_all(
    registry: &Registry,
    transport: &dyn Transport,
    decoder: &dyn PayloadDecoder,
    ctx: &Context,
) -> Result<(), Error> {
    let snapshot = registry.snapshot();
    let mut extraction_failures = Vec::new();

    for record in snapshot {
        let response = match transport
            .send(ctx, record.method.as_str(), record.params.clone())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    subscription = %record.internal_id,
                    error = %e,
                    "live query failed to restore: transport error"
                );
                continue;
            }
        };

        let payload = match response.result {
            Ok(payload) => payload,
            Err(message) => {
                tracing::warn!(
                    subscription = %record.internal_id,
                    error = %message,
                    "live query failed to restore: rpc error"
                );
                continue;
            }
        };

        match extract_subscription_id(decoder, record.method, &payload) {
            Ok(new_external_id) => {
                registry.set_external_id(record.internal_id, new_external_id);
            }
            Err(e) => {
                tracing::error!(
                    subscription = %record.internal_id,
                    error = %e,
                    "live query restored but its new subscription id could not be extracted"
                );
                extraction_failures.push(record.internal_id);
            }
        }
    }

    if extraction_failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Restoration {
            failed: extraction_failures,
        })
    }
}
