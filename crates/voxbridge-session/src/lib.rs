// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory session state, partitioned by account.
//!
//! Each account owns one [`SessionStore`]: the live sessions of its calls,
//! a call-id index, the outbound text queues, and a pointer to the most
//! recently seen session. The [`SessionRegistry`] shards stores by account
//! id and exposes the outbound send surface other parts of the host
//! application use to speak into a call.
//!
//! Stores are only ever mutated from two places — the account's dispatch
//! task and outbound-send callers — so a per-shard async mutex is enough;
//! contention is near zero.

mod registry;
mod store;

pub use registry::{OutboundError, SessionRegistry};
pub use store::{CallDirection, CallInfo, QueuedMessage, Session, SessionStore};
