//! Persistent at-most-once execution of side-effecting provisioning actions.
//!
//! Provides `ActionId` (the canonical identity of a unit of work) and
//! `ActionCache` (the redb-backed record of identities that have completed).
//! A record is written only after its action succeeds and is never removed;
//! wiping the data volume is the only reset.

pub mod db;
pub mod identity;

pub use db::{ActionCache, CacheEntry, RunOnce};
pub use identity::ActionId;
