//! Domain model for the user store.
//!
//! # Invariants
//! - Every persisted record is identified by a store-assigned `UserId`.
//! - Zero values mean "unset" for both unsaved records and filters.

pub mod user;
