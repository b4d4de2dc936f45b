//! Core library for the user store.
//!
//! A thin SQLite-backed record store for `User` rows, plus the probe service
//! that exercises raw select customizations against it.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::user::{User, UserId};
pub use repo::user_repo::{
    FindQuery, RepoError, RepoResult, Scope, SqliteUserRepository, UserRepository,
};
pub use service::probe_service::{
    spacing_variants, ProbeError, ProbeOutcome, ProbeReport, ProbeService, SelectProbe,
    DEFAULT_SELECT,
};
