//! Select-customization probe.
//!
//! # Responsibility
//! - Seed one user, verify it reads back, then run a set of raw select
//!   customizations and record what each one produced.
//!
//! # Invariants
//! - Read-back is filtered by the seeded id, so rows left by earlier runs in
//!   a file database do not affect verification.
//! - Seed and verify failures abort the run.
//! - Select probes never abort the run; their outcome is part of the report.

use crate::model::user::User;
use crate::repo::user_repo::{FindQuery, RepoError, Scope, UserRepository};
use log::{error, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Default aggregate probed by the CLI.
pub const DEFAULT_SELECT: &str = "MAX(id) AS id";

/// Service error for the seed/verify steps.
#[derive(Debug)]
pub enum ProbeError {
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Read-back by id returned no row or more than one.
    UnexpectedRowCount { expected: usize, actual: usize },
    /// Read-back returned a row with another name.
    UnexpectedName { expected: String, actual: String },
}

impl Display for ProbeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::UnexpectedRowCount { expected, actual } => {
                write!(f, "expected {expected} user row(s), found {actual}")
            }
            Self::UnexpectedName { expected, actual } => {
                write!(f, "expected user named {expected:?}, found {actual:?}")
            }
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::UnexpectedRowCount { .. } | Self::UnexpectedName { .. } => None,
        }
    }
}

impl From<RepoError> for ProbeError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// What one select customization produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Rows { users: Vec<User> },
    ShapeMismatch { error: String },
    StorageFailure { error: String },
}

impl ProbeOutcome {
    fn from_result(result: Result<Vec<User>, RepoError>) -> Self {
        match result {
            Ok(users) => Self::Rows { users },
            Err(err) if err.is_shape_mismatch() => Self::ShapeMismatch {
                error: err.to_string(),
            },
            Err(err) => Self::StorageFailure {
                error: err.to_string(),
            },
        }
    }

    /// Compares outcome kinds and rows, ignoring error wording.
    fn same_kind_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Rows { users: left }, Self::Rows { users: right }) => left == right,
            (Self::ShapeMismatch { .. }, Self::ShapeMismatch { .. }) => true,
            (Self::StorageFailure { .. }, Self::StorageFailure { .. }) => true,
            _ => false,
        }
    }
}

/// One select customization and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectProbe {
    pub select: String,
    pub outcome: ProbeOutcome,
}

/// Result of a full probe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub seeded: User,
    pub verified: User,
    pub probes: Vec<SelectProbe>,
    /// True when every probe produced the same kind of outcome.
    pub consistent: bool,
}

/// Returns `select` followed by its spelling with a space after every `(`.
///
/// Both spellings are the same SQL expression.
pub fn spacing_variants(select: &str) -> Vec<String> {
    let spaced = select.replace('(', "( ");
    if spaced == select {
        vec![select.to_string()]
    } else {
        vec![select.to_string(), spaced]
    }
}

/// Use-case service running the probe against a repository.
pub struct ProbeService<R: UserRepository> {
    repo: R,
}

impl<R: UserRepository> ProbeService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Inserts one user named `name` in its own transaction.
    pub fn seed(&self, name: &str) -> Result<User, ProbeError> {
        let mut user = User::new(name);
        self.repo.insert_user(Scope::Standalone, &mut user)?;
        info!("event=probe_seed module=service status=ok {user}");
        Ok(user)
    }

    /// Reads `seeded` back by id and requires the stored name to match.
    pub fn verify_seeded(&self, seeded: &User) -> Result<User, ProbeError> {
        let filter = User {
            id: seeded.id,
            ..User::default()
        };
        let mut users = self.repo.find_users(Scope::Standalone, None, &filter)?;
        if users.len() != 1 {
            error!(
                "event=probe_verify module=service status=error id={} rows={}",
                seeded.id,
                users.len()
            );
            return Err(ProbeError::UnexpectedRowCount {
                expected: 1,
                actual: users.len(),
            });
        }

        let user = users.remove(0);
        if user.name != seeded.name {
            error!("event=probe_verify module=service status=error {user}");
            return Err(ProbeError::UnexpectedName {
                expected: seeded.name.clone(),
                actual: user.name,
            });
        }

        info!("event=probe_verify module=service status=ok {user}");
        Ok(user)
    }

    /// Runs `select` limited to one row over all users.
    pub fn probe_select(&self, select: &str) -> SelectProbe {
        let customize: &dyn Fn(&mut FindQuery) = &|query| {
            query.select(select).limit(1);
        };
        let outcome = ProbeOutcome::from_result(self.repo.find_users(
            Scope::Standalone,
            Some(customize),
            &User::default(),
        ));

        match &outcome {
            ProbeOutcome::Rows { users } => info!(
                "event=probe_select module=service status=rows select={select:?} rows={}",
                users.len()
            ),
            ProbeOutcome::ShapeMismatch { error } => warn!(
                "event=probe_select module=service status=shape_mismatch select={select:?} error={error}"
            ),
            ProbeOutcome::StorageFailure { error } => warn!(
                "event=probe_select module=service status=storage_failure select={select:?} error={error}"
            ),
        }

        SelectProbe {
            select: select.to_string(),
            outcome,
        }
    }

    /// Seeds `name`, verifies it, and probes every entry of `selects`.
    pub fn run<S: AsRef<str>>(&self, name: &str, selects: &[S]) -> Result<ProbeReport, ProbeError> {
        let seeded = self.seed(name)?;
        let verified = self.verify_seeded(&seeded)?;
        let probes: Vec<SelectProbe> = selects
            .iter()
            .map(|select| self.probe_select(select.as_ref()))
            .collect();
        let consistent = probes
            .windows(2)
            .all(|pair| pair[0].outcome.same_kind_as(&pair[1].outcome));

        info!(
            "event=probe_run module=service status=ok probes={} consistent={}",
            probes.len(),
            consistent
        );
        Ok(ProbeReport {
            seeded,
            verified,
            probes,
            consistent,
        })
    }
}
