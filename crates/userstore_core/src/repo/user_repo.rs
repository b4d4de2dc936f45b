//! User repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Insert one user and find users matching a filter record.
//! - Run each call inside a caller transaction or a short-lived one of its own.
//!
//! # Invariants
//! - A standalone scope is committed on success and rolled back on every
//!   error path before the call returns.
//! - Raw select/order fragments from a customization are passed to SQLite
//!   verbatim. Mapping result columns back onto `User` is by column name.
//! - A failed insert leaves the caller's record untouched.

use crate::db::DbError;
use crate::model::user::{User, UserId};
use log::{debug, error, info};
use rusqlite::types::{FromSql, Value};
use rusqlite::{params_from_iter, Connection, Row, Statement, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const USERS_TABLE: &str = "users";
const USER_COLUMNS: &str = "id, name, created_at, updated_at";
const DEFAULT_ORDER: &str = "id ASC";
// `'now'` is fixed for one statement step, so both timestamps of an insert match.
const NOW_EPOCH_MS_SQL: &str = "CAST(unixepoch('subsec') * 1000 AS INTEGER)";

const OP_INSERT: &str = "insert_user";
const OP_FIND: &str = "find_users";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error carrying the failed operation and its arguments.
#[derive(Debug)]
pub enum RepoError {
    /// The database rejected the call: connection, transaction, malformed SQL
    /// or malformed customization. Possibly transient.
    Storage {
        operation: &'static str,
        context: String,
        source: DbError,
    },
    /// The query ran, but a returned column cannot populate `User`.
    /// Deterministic for a given query text.
    ShapeMismatch {
        operation: &'static str,
        column: String,
        reason: String,
    },
}

impl RepoError {
    fn storage(operation: &'static str, context: impl Into<String>, err: impl Into<DbError>) -> Self {
        Self::Storage {
            operation,
            context: context.into(),
            source: err.into(),
        }
    }

    /// Name of the repository operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Storage { operation, .. } | Self::ShapeMismatch { operation, .. } => *operation,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage {
                operation,
                context,
                source,
            } => write!(f, "{operation} failed ({context}): {source}"),
            Self::ShapeMismatch {
                operation,
                column,
                reason,
            } => write!(
                f,
                "{operation} result column `{column}` cannot populate user: {reason}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage { source, .. } => Some(source),
            Self::ShapeMismatch { .. } => None,
        }
    }
}

/// Transaction scope for one repository call.
#[derive(Clone, Copy)]
pub enum Scope<'s> {
    /// Run on a transaction owned by the caller. Nothing is committed until
    /// the caller commits it.
    Caller(&'s Transaction<'s>),
    /// Open, commit and release a transaction around this call only.
    Standalone,
}

impl Scope<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Caller(_) => "caller",
            Self::Standalone => "standalone",
        }
    }
}

/// In-flight query shape that a customization may alter before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    columns: Option<String>,
    order_by: Option<String>,
    limit: Option<u32>,
    offset: u32,
}

impl FindQuery {
    /// Replaces the selected column list with a raw SQL fragment.
    pub fn select(&mut self, columns: impl Into<String>) -> &mut Self {
        self.columns = Some(columns.into());
        self
    }

    /// Replaces the default `id ASC` ordering with a raw SQL fragment.
    pub fn order_by(&mut self, order: impl Into<String>) -> &mut Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(&mut self, limit: u32) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u32) -> &mut Self {
        self.offset = offset;
        self
    }

    fn to_sql(&self, filter: &User) -> (String, Vec<Value>) {
        let columns = self.columns.as_deref().unwrap_or(USER_COLUMNS);
        let mut sql = format!("SELECT {columns} FROM {USERS_TABLE} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if filter.id != 0 {
            sql.push_str(" AND id = ?");
            bind_values.push(Value::Integer(filter.id));
        }
        if !filter.name.is_empty() {
            sql.push_str(" AND name = ?");
            bind_values.push(Value::Text(filter.name.clone()));
        }
        if filter.created_at != 0 {
            sql.push_str(" AND created_at = ?");
            bind_values.push(Value::Integer(filter.created_at));
        }
        if filter.updated_at != 0 {
            sql.push_str(" AND updated_at = ?");
            bind_values.push(Value::Integer(filter.updated_at));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(self.order_by.as_deref().unwrap_or(DEFAULT_ORDER));

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(self.offset)));
        }

        (sql, bind_values)
    }
}

/// Repository interface for user persistence.
pub trait UserRepository {
    /// Persists `user` and writes the assigned id and timestamps back into it.
    fn insert_user(&self, scope: Scope<'_>, user: &mut User) -> RepoResult<()>;

    /// Returns users matching every non-zero field of `filter`.
    ///
    /// `customize` may alter the query (columns, ordering, limit) before it
    /// runs. Its fragments are not validated here.
    fn find_users(
        &self,
        scope: Scope<'_>,
        customize: Option<&dyn Fn(&mut FindQuery)>,
        filter: &User,
    ) -> RepoResult<Vec<User>>;
}

/// SQLite-backed user repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn within_scope<T>(
        &self,
        operation: &'static str,
        scope: Scope<'_>,
        behavior: TransactionBehavior,
        work: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        match scope {
            Scope::Caller(tx) => {
                let conn: &Connection = tx;
                work(conn)
            }
            Scope::Standalone => {
                let tx = Transaction::new_unchecked(self.conn, behavior)
                    .map_err(|err| RepoError::storage(operation, "begin transaction", err))?;
                let conn: &Connection = &tx;
                // Dropping `tx` on the error path rolls it back.
                let value = work(conn)?;
                tx.commit()
                    .map_err(|err| RepoError::storage(operation, "commit transaction", err))?;
                Ok(value)
            }
        }
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn insert_user(&self, scope: Scope<'_>, user: &mut User) -> RepoResult<()> {
        let started_at = Instant::now();
        debug!(
            "event=user_insert module=repo status=start scope={} name={:?}",
            scope.label(),
            user.name
        );

        let sql = format!(
            "INSERT INTO {USERS_TABLE} (name, created_at, updated_at)
             VALUES (?1, {NOW_EPOCH_MS_SQL}, {NOW_EPOCH_MS_SQL})
             RETURNING id, created_at, updated_at;"
        );
        let name = user.name.as_str();
        let assigned = self.within_scope(OP_INSERT, scope, TransactionBehavior::Immediate, |conn| {
            debug!("event=sql module=repo operation={OP_INSERT} sql={sql:?}");
            conn.query_row(&sql, [name], |row| {
                Ok((
                    row.get::<_, UserId>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(|err| RepoError::storage(OP_INSERT, format!("name={name:?}"), err))
        });

        match assigned {
            Ok((id, created_at, updated_at)) => {
                user.id = id;
                user.created_at = created_at;
                user.updated_at = updated_at;
                info!(
                    "event=user_insert module=repo status=ok scope={} duration_ms={} {}",
                    scope.label(),
                    started_at.elapsed().as_millis(),
                    user
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=user_insert module=repo status=error scope={} duration_ms={} error={}",
                    scope.label(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn find_users(
        &self,
        scope: Scope<'_>,
        customize: Option<&dyn Fn(&mut FindQuery)>,
        filter: &User,
    ) -> RepoResult<Vec<User>> {
        let started_at = Instant::now();
        let mut query = FindQuery::default();
        if let Some(customize) = customize {
            customize(&mut query);
        }
        let (sql, bind_values) = query.to_sql(filter);
        let context = format!("filter=[{filter}] sql={sql:?}");
        debug!(
            "event=user_find module=repo status=start scope={} {}",
            scope.label(),
            context
        );

        let found = self.within_scope(OP_FIND, scope, TransactionBehavior::Deferred, |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| RepoError::storage(OP_FIND, context.as_str(), err))?;
            let columns = map_result_columns(&stmt)?;

            let mut rows = stmt
                .query(params_from_iter(bind_values))
                .map_err(|err| RepoError::storage(OP_FIND, context.as_str(), err))?;
            let mut users = Vec::new();
            while let Some(row) = rows
                .next()
                .map_err(|err| RepoError::storage(OP_FIND, context.as_str(), err))?
            {
                users.push(parse_user_row(row, &columns)?);
            }
            Ok(users)
        });

        match found {
            Ok(users) => {
                info!(
                    "event=user_find module=repo status=ok scope={} duration_ms={} rows={}",
                    scope.label(),
                    started_at.elapsed().as_millis(),
                    users.len()
                );
                for user in &users {
                    debug!("event=user_find module=repo status=row {user}");
                }
                Ok(users)
            }
            Err(err) => {
                error!(
                    "event=user_find module=repo status=error scope={} duration_ms={} error={}",
                    scope.label(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

/// `User` fields addressable by a result column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserColumn {
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

impl UserColumn {
    const ALL: [UserColumn; 4] = [Self::Id, Self::Name, Self::CreatedAt, Self::UpdatedAt];

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    fn from_result_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(name))
    }
}

fn map_result_columns(stmt: &Statement<'_>) -> RepoResult<Vec<UserColumn>> {
    stmt.column_names()
        .into_iter()
        .map(|name| {
            UserColumn::from_result_name(name).ok_or_else(|| RepoError::ShapeMismatch {
                operation: OP_FIND,
                column: name.to_string(),
                reason: "no user field has this name".to_string(),
            })
        })
        .collect()
}

fn parse_user_row(row: &Row<'_>, columns: &[UserColumn]) -> RepoResult<User> {
    let mut user = User::default();
    for (index, column) in columns.iter().copied().enumerate() {
        match column {
            UserColumn::Id => user.id = read_column(row, index, column)?.unwrap_or_default(),
            UserColumn::Name => user.name = read_column(row, index, column)?.unwrap_or_default(),
            UserColumn::CreatedAt => {
                user.created_at = read_column(row, index, column)?.unwrap_or_default()
            }
            UserColumn::UpdatedAt => {
                user.updated_at = read_column(row, index, column)?.unwrap_or_default()
            }
        }
    }
    Ok(user)
}

fn read_column<T: FromSql>(row: &Row<'_>, index: usize, column: UserColumn) -> RepoResult<Option<T>> {
    row.get::<_, Option<T>>(index).map_err(|err| {
        if is_conversion_error(&err) {
            RepoError::ShapeMismatch {
                operation: OP_FIND,
                column: column.name().to_string(),
                reason: err.to_string(),
            }
        } else {
            RepoError::storage(OP_FIND, format!("read column {}", column.name()), err)
        }
    })
}

fn is_conversion_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

#[cfg(test)]
mod tests {
    use super::{FindQuery, UserColumn};
    use crate::model::user::User;
    use rusqlite::types::Value;

    #[test]
    fn default_query_selects_all_columns_ordered_by_id() {
        let (sql, binds) = FindQuery::default().to_sql(&User::default());
        assert_eq!(
            sql,
            "SELECT id, name, created_at, updated_at FROM users WHERE 1 = 1 ORDER BY id ASC"
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn non_zero_filter_fields_become_bound_constraints() {
        let filter = User {
            id: 3,
            name: "Alice".to_string(),
            ..User::default()
        };
        let (sql, binds) = FindQuery::default().to_sql(&filter);
        assert!(sql.contains("AND id = ? AND name = ?"));
        assert!(!sql.contains("created_at = ?"));
        assert_eq!(
            binds,
            vec![Value::Integer(3), Value::Text("Alice".to_string())]
        );
    }

    #[test]
    fn customized_select_is_passed_through_verbatim() {
        let mut query = FindQuery::default();
        query.select("MAX( id) AS id").limit(1);
        let (sql, binds) = query.to_sql(&User::default());
        assert!(sql.starts_with("SELECT MAX( id) AS id FROM users"));
        assert!(sql.ends_with("ORDER BY id ASC LIMIT ?"));
        assert_eq!(binds, vec![Value::Integer(1)]);
    }

    #[test]
    fn offset_without_limit_uses_unbounded_limit() {
        let mut query = FindQuery::default();
        query.order_by("name DESC").offset(2);
        let (sql, binds) = query.to_sql(&User::default());
        assert!(sql.ends_with("ORDER BY name DESC LIMIT -1 OFFSET ?"));
        assert_eq!(binds, vec![Value::Integer(2)]);
    }

    #[test]
    fn result_column_names_match_case_insensitively() {
        assert_eq!(UserColumn::from_result_name("ID"), Some(UserColumn::Id));
        assert_eq!(
            UserColumn::from_result_name("Created_At"),
            Some(UserColumn::CreatedAt)
        );
        assert_eq!(UserColumn::from_result_name("MAX(id)"), None);
    }
}
