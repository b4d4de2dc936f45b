//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs distinguish storage failures from result-shape
//!   mismatches so callers can choose between retry and reject.

pub mod user_repo;
