//! setuplive is the progress-tracking synchronization protocol behind a
//! client-onboarding dashboard.
//!
//! # Overview
//! An untrusted, intermittently connecting installer script pushes state
//! updates into a shared per-session store, and polling consumers observe
//! that state and detect terminal conditions. This crate provides:
//!
//! - The session data model ([`record`]): one overwritten current-state
//!   snapshot plus one append-only error log per session.
//! - Payload validation ([`validate`]) with full field-level issue lists.
//! - The store protocol ([`store`]): a [`store::SessionStore`] trait with
//!   refresh-on-write TTL semantics and an in-memory backend.
//! - The consumer-side polling state machine ([`poll`]).
//! - HTTP read/write clients for the wire protocol ([`client`]).
//!
//! Delivery is strictly pull-based; sessions never interact with each
//! other, and a session identifier is a bearer capability.

/// Session data model and wire types
pub mod record;

/// Validation of untrusted installer payloads
pub mod validate;

/// Session store trait and backends
pub mod store;

/// Polling client state machine
pub mod poll;

/// HTTP clients for the synchronization service
pub mod client;

pub use record::{
    ClientOs, CompletionNotice, ErrorLogEntry, Phase, ProgressError, ProgressRecord, SessionId,
    ToolState, ToolStatus,
};
pub use store::{DEFAULT_TTL, InMemoryStore, SessionStore, StoreError};
