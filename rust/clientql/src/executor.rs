//! Read-only SQL execution.
//!
//! Statements are validated, wrapped so every row comes back as a single
//! `jsonb` object, and run on a pooled connection obtained through the
//! connection guard.

use crate::{
    config::AppConfig,
    db::PgGuard,
    error::{Result, ServiceError},
};
use bb8::RunError;
use diesel::deserialize::QueryableByName;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Jsonb, Nullable};
use diesel_async::RunQueryDsl;
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Nullable<Jsonb>)]
    result: Option<Value>,
    /// Output columns as projected, duplicates included.
    #[diesel(sql_type = BigInt)]
    column_count: i64,
}

#[derive(Clone)]
pub struct QueryExecutor {
    guard: Arc<PgGuard>,
    timeout: Duration,
    max_pool_size: u32,
}

impl QueryExecutor {
    pub fn new(guard: Arc<PgGuard>, config: &AppConfig) -> Self {
        Self {
            guard,
            timeout: config.request_timeout,
            max_pool_size: config.max_pool_size,
        }
    }

    /// Runs one SELECT and returns its rows in order, each keyed by output
    /// column name. Column names must be unique within the result.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let statement = ensure_select(sql)?;
        let wrapped = wrap_as_json(statement);

        let pool = self.guard.ensure_connected().await?;
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                let state = pool.state();
                let exhausted = matches!(err, RunError::TimedOut)
                    && pool_exhausted(
                        state.connections,
                        state.idle_connections,
                        self.max_pool_size,
                    );
                if !exhausted {
                    self.guard.reset().await;
                }
                return Err(acquisition_error(err, exhausted));
            }
        };

        let loaded = tokio::time::timeout(
            self.timeout,
            sql_query(wrapped).load::<JsonRow>(&mut *conn),
        )
        .await
        .map_err(|_| {
            warn!(timeout_secs = self.timeout.as_secs(), "query exceeded request timeout");
            ServiceError::Timeout(self.timeout.as_secs())
        })?;

        let rows = match loaded {
            Ok(rows) => rows,
            Err(err) if is_statement_timeout(&err) => {
                return Err(ServiceError::Timeout(self.timeout.as_secs()));
            }
            Err(err) if is_connection_loss(&err) => {
                error!(error = %err, "database connection lost during query");
                self.guard.reset().await;
                return Err(ServiceError::Connection(err.to_string()));
            }
            Err(err) => return Err(database_error(err)),
        };

        debug!(rows = rows.len(), "query executed");
        into_rows(rows)
    }
}

/// Accepts a single SELECT statement and returns it without trailing `;`.
pub fn ensure_select(sql: &str) -> Result<&str> {
    let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    if statement.is_empty() {
        return Err(ServiceError::InvalidRequest("sql must not be empty".into()));
    }

    let leading = statement
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default();
    if !leading.eq_ignore_ascii_case("select") {
        return Err(ServiceError::ReadOnly("only SELECT queries are allowed".into()));
    }

    if statement.contains(';') {
        return Err(ServiceError::ReadOnly(
            "multiple statements are not allowed".into(),
        ));
    }

    Ok(statement)
}

fn wrap_as_json(statement: &str) -> String {
    format!(
        "SELECT to_jsonb(q) AS result,\n\
         \x20      (SELECT COUNT(*) FROM json_object_keys(row_to_json(q))) AS column_count\n\
         FROM (\n{statement}\n) AS q"
    )
}

/// `jsonb` keeps one value per key, so a row whose object is narrower than
/// its projection lost a duplicated column name.
fn into_rows(rows: Vec<JsonRow>) -> Result<Vec<Row>> {
    rows.into_iter()
        .map(|row| {
            let columns = row.column_count;
            let object = into_object(row.result);
            if (object.len() as i64) < columns {
                return Err(ServiceError::InvalidRequest(
                    "result has duplicate column names; give each column a distinct alias"
                        .into(),
                ));
            }
            Ok(object)
        })
        .collect()
}

fn into_object(value: Option<Value>) -> Row {
    match value {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        None => Map::new(),
    }
}

/// bb8 reports an exhausted pool and a failing connect alike as `TimedOut`.
/// An exhausted pool has every connection open and checked out.
fn pool_exhausted(connections: u32, idle: u32, max_size: u32) -> bool {
    connections >= max_size && idle == 0
}

fn acquisition_error(err: RunError<anyhow::Error>, exhausted: bool) -> ServiceError {
    match err {
        RunError::User(err) => {
            let message = format!("{err:#}");
            error!(error = %message, "failed to open database connection");
            ServiceError::Connection(message)
        }
        RunError::TimedOut if exhausted => {
            warn!("timed out waiting for a pooled database connection");
            ServiceError::Connection("connection pool exhausted".into())
        }
        RunError::TimedOut => {
            error!("could not open a database connection; resetting pool");
            ServiceError::Connection("could not open a database connection".into())
        }
    }
}

/// Server-side `statement_timeout` expiry (SQLSTATE 57014).
fn is_statement_timeout(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(_, info) => info.message().contains("statement timeout"),
        _ => false,
    }
}

fn is_connection_loss(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand,
            _,
        )
        | DieselError::BrokenTransactionManager => true,
        DieselError::DatabaseError(_, info) => {
            info.message().starts_with("terminating connection")
        }
        _ => false,
    }
}

fn database_error(err: DieselError) -> ServiceError {
    match err {
        DieselError::DatabaseError(_, info) => {
            describe_database_error(info.message(), info.details(), info.hint())
        }
        other => ServiceError::Internal(
            anyhow::Error::new(other).context("failed to decode query result"),
        ),
    }
}

fn describe_database_error(
    message: &str,
    detail: Option<&str>,
    hint: Option<&str>,
) -> ServiceError {
    let message = match hint {
        Some(hint) => format!("{message} (hint: {hint})"),
        None => message.to_string(),
    };
    ServiceError::Database {
        message,
        detail: detail.map(str::to_string),
        hint: hint.map(str::to_string),
    }
}
