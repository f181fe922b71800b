//! Domain types and pure algorithms for the collaboration gateway.
//!
//! This crate has no networking and no external store dependency: it holds
//! the resource-id codec, the error catalog, the sliding-window rate
//! limiter, the lock ownership state machine (generic over a `LockStore`),
//! and the in-memory presence room registry. The gateway crate wires these
//! into a real transport, a real token validator, and a real Redis-backed
//! lock store.

pub mod error;
pub mod events;
pub mod lock;
pub mod presence;
pub mod principal;
pub mod ratelimit;
pub mod resource_id;

pub use error::{ErrorFrame, GatewayError, GatewayResult};
pub use lock::{AcquireOutcome, InMemoryLockStore, LockEngine, LockStore, LockValue, Ttl};
pub use presence::{JoinOutcome, LeaveOutcome, LeaveReason, Mode, PresenceRegistry, ResourceUser, Room};
pub use principal::Principal;
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use resource_id::{ResourceId, SubResource};
