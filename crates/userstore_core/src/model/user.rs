//! User record model.
//!
//! # Responsibility
//! - Define the single row shape stored in the `users` table.
//! - Double as a filter: non-zero fields constrain `find_users` matches.
//!
//! # Invariants
//! - `id` is assigned by the store, never reused, and never changes.
//! - `created_at <= updated_at` for every persisted record.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Store-assigned row identifier. `0` means "not assigned yet".
pub type UserId = i64;

/// Canonical user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name, at most 64 characters by schema convention.
    pub name: String,
    /// Unix epoch milliseconds, set once on insert.
    pub created_at: i64,
    /// Unix epoch milliseconds, bumped on every mutation.
    pub updated_at: i64,
}

impl User {
    /// Creates an unsaved record carrying only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns whether the store has assigned an identifier.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}

impl Display for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id={} name={:?} created_at={} updated_at={}",
            self.id, self.name, self.created_at, self.updated_at
        )
    }
}
