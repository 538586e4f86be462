use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OpenFlags, params_from_iter};
use serde::Serialize;

use crate::catalog::{DEFAULT_TABLE, ValueCast};
use crate::compile::{CompiledQuery, TimeBucket};
use crate::config::MAX_QUERY_TIMEOUT_MS;
use crate::execute::{DataStore, ExecutionError, RawBucketRow};
use crate::models::{Aggregation, HealthRecord};
use crate::utils::time::format_calendar_date;

pub const RECORDS_TABLE: &str = DEFAULT_TABLE;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

pub const RECORD_INSERT_COLUMNS: &[&str] = &[
    "type",
    "sourceName",
    "unit",
    "startDate",
    "endDate",
    "value",
];

const CREATE_RECORDS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS healthkit_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    "type" TEXT NOT NULL,
    "sourceName" TEXT,
    "unit" TEXT,
    "startDate" TEXT NOT NULL,
    "endDate" TEXT,
    "value" TEXT
);
"#;

const CREATE_INDEX_TYPE_START_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_healthkit_records_type_start
ON healthkit_records ("type", "startDate");
"#;

#[must_use]
pub fn create_schema_sql() -> String {
    [CREATE_RECORDS_TABLE_SQL, CREATE_INDEX_TYPE_START_SQL].join("\n")
}

/// Opens (creating if needed) a writable database. Used by import tooling
/// and fixtures; queries go through [`SqliteStore`].
pub fn open_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create sqlite parent directory: {}",
                parent.display()
            )
        })?;
    }

    Connection::open(path)
        .with_context(|| format!("failed to open sqlite database: {}", path.display()))
}

pub fn ensure_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(&create_schema_sql())
        .context("failed to create sqlite schema")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteWriteStats {
    pub input_records: usize,
    pub records_written: usize,
    pub batches_committed: usize,
}

pub fn write_records_to_sqlite(path: &Path, records: &[HealthRecord]) -> Result<SqliteWriteStats> {
    let mut connection = open_sqlite_connection(path)?;
    ensure_sqlite_schema(&connection)?;
    write_records_batched(&mut connection, records, DEFAULT_INSERT_BATCH_SIZE)
}

pub fn write_records_batched(
    connection: &mut Connection,
    records: &[HealthRecord],
    batch_size: usize,
) -> Result<SqliteWriteStats> {
    let insert_sql = build_insert_sql();
    let mut records_written = 0usize;
    let mut batches_committed = 0usize;

    for batch in records.chunks(batch_size.max(1)) {
        let tx = connection
            .transaction()
            .context("failed to open sqlite transaction")?;
        {
            let mut statement = tx
                .prepare_cached(&insert_sql)
                .context("failed to prepare sqlite insert statement")?;

            for record in batch {
                statement
                    .execute(params_from_iter(record_insert_values(record)))
                    .with_context(|| {
                        format!(
                            "failed to insert {} record starting {}",
                            record.record_type, record.start_date
                        )
                    })?;
                records_written += 1;
            }
        }
        tx.commit()
            .context("failed to commit sqlite batch transaction")?;
        batches_committed += 1;
    }

    Ok(SqliteWriteStats {
        input_records: records.len(),
        records_written,
        batches_committed,
    })
}

fn build_insert_sql() -> String {
    let columns = RECORD_INSERT_COLUMNS
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=RECORD_INSERT_COLUMNS.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {RECORDS_TABLE} ({columns}) VALUES ({placeholders})")
}

fn record_insert_values(record: &HealthRecord) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(record.record_type.clone()),
        opt_text_value(record.source_name.as_deref()),
        opt_text_value(record.unit.as_deref()),
        SqlValue::Text(record.start_date.clone()),
        opt_text_value(record.end_date.as_deref()),
        opt_text_value(record.value.as_deref()),
    ]
}

fn opt_text_value(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, |value| SqlValue::Text(value.to_string()))
}

/// Parameterised SQL for one compiled query. Identifiers come from the
/// catalog and are quoted; every request-derived value is a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[must_use]
pub fn render_query(query: &CompiledQuery) -> RenderedQuery {
    let source = &query.source;
    let date_column = timestamp_expression(&quote_identifier(&source.date_column));
    let value_column = quote_identifier(&source.value_column);

    let mut conditions = Vec::new();
    let mut params = Vec::new();
    for filter in &source.filters {
        params.push(SqlValue::Text(filter.value.clone()));
        conditions.push(format!(
            "{} = ?{}",
            quote_identifier(&filter.column),
            params.len()
        ));
    }
    if query.aggregation != Aggregation::Count {
        conditions.push(format!("{value_column} IS NOT NULL"));
    }
    for predicate in &query.predicates {
        params.push(SqlValue::Text(format_calendar_date(predicate.date)));
        conditions.push(format!(
            "date({}) {} ?{}",
            timestamp_expression(&quote_identifier(&predicate.column)),
            predicate.comparison.operator(),
            params.len()
        ));
    }
    params.push(SqlValue::Integer(
        i64::try_from(query.fetch_limit()).unwrap_or(i64::MAX),
    ));
    let limit_index = params.len();

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("\nWHERE {}", conditions.join("\n  AND "))
    };

    let sql = format!(
        "SELECT\n  {} AS bucket_start,\n  {} AS value\nFROM {}{where_clause}\nGROUP BY bucket_start\nORDER BY bucket_start ASC\nLIMIT ?{limit_index}",
        bucket_expression(query.bucket, &date_column),
        aggregate_expression(query.aggregation, &value_column, source.cast),
        quote_identifier(&source.table),
    );

    RenderedQuery { sql, params }
}

/// Rewrites a trailing `±HHMM` offset (Apple's `2021-06-01 08:00:00 -0500`)
/// to `±HH:MM`, the only offset form SQLite date functions parse.
fn timestamp_expression(column: &str) -> String {
    format!(
        "(CASE WHEN {column} GLOB '*:[0-9][0-9]*[+-][0-9][0-9][0-9][0-9]' \
         THEN substr({column}, 1, length({column}) - 2) || ':' || substr({column}, -2) \
         ELSE {column} END)"
    )
}

fn bucket_expression(bucket: TimeBucket, date_column: &str) -> String {
    match bucket {
        TimeBucket::CalendarDay => format!("date({date_column})"),
        // %w counts from Sunday = 0; shift so Monday is the first day.
        TimeBucket::IsoWeekMonday => format!(
            "date({date_column}, '-' || ((CAST(strftime('%w', {date_column}) AS INTEGER) + 6) % 7) || ' days')"
        ),
        TimeBucket::CalendarMonth => format!("strftime('%Y-%m-01', {date_column})"),
    }
}

fn aggregate_expression(aggregation: Aggregation, value_column: &str, cast: ValueCast) -> String {
    let function = match aggregation {
        Aggregation::Count => return "COUNT(*)".to_string(),
        Aggregation::Avg => "AVG",
        Aggregation::Sum => "SUM",
        Aggregation::Min => "MIN",
        Aggregation::Max => "MAX",
    };
    let sql_type = match cast {
        ValueCast::Double => "REAL",
        ValueCast::Integer => "INTEGER",
    };
    format!("{function}(CAST({value_column} AS {sql_type}))")
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn sqlite_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Read-only query backend over a SQLite file of exported records.
///
/// Holds only the path; every call opens its own connection, so one store
/// can serve concurrent callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, cause: impl Into<String>) -> ExecutionError {
        ExecutionError::DataStoreUnavailable {
            store: self.describe(),
            cause: cause.into(),
        }
    }

    fn open_read_only(&self, timeout: Duration) -> Result<Connection, ExecutionError> {
        if !self.path.is_file() {
            return Err(self.unavailable("database file does not exist"));
        }

        let connection = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|error| self.unavailable(error.to_string()))?;
        set_busy_timeout(&connection, timeout)
            .map_err(|error| self.unavailable(error.to_string()))?;
        Ok(connection)
    }

    /// Most frequent record types with their units, for discovering what a
    /// database holds before writing catalog entries.
    pub fn record_type_summary(
        &self,
        limit: u32,
        timeout: Duration,
    ) -> Result<Vec<RecordTypeSummary>, ExecutionError> {
        let started = Instant::now();
        let connection = self.open_read_only(timeout)?;
        let columns = load_table_columns(&connection, RECORDS_TABLE)
            .map_err(|error| self.unavailable(error.to_string()))?;
        let missing = missing_columns(&columns, ["type", "unit", "startDate"]);
        if !missing.is_empty() {
            return Err(ExecutionError::SchemaMismatch {
                metric: "*".to_string(),
                relation: RECORDS_TABLE.to_string(),
                missing,
                cause: format!("table `{RECORDS_TABLE}` is missing or incomplete"),
            });
        }

        let start_date = timestamp_expression("\"startDate\"");
        let sql = format!(
            "SELECT \"type\", \"unit\", COUNT(*) AS records, MIN(date({start_date})), MAX(date({start_date}))
             FROM {RECORDS_TABLE}
             GROUP BY \"type\", \"unit\"
             ORDER BY records DESC, \"type\" ASC
             LIMIT ?1"
        );
        let budget = remaining_budget(&connection, started, timeout)
            .map_err(|failure| self.classify(failure, "*", RECORDS_TABLE, timeout))?;
        run_with_deadline(&connection, budget, |connection| {
            let mut statement = connection.prepare(&sql)?;
            let rows = statement.query_map([i64::from(limit)], |row| {
                Ok(RecordTypeSummary {
                    record_type: row.get(0)?,
                    unit: row.get(1)?,
                    records: row.get(2)?,
                    first_date: row.get(3)?,
                    last_date: row.get(4)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|failure| self.classify(failure, "*", RECORDS_TABLE, timeout))
    }

    fn check_source_schema(
        &self,
        connection: &Connection,
        query: &CompiledQuery,
    ) -> Result<(), ExecutionError> {
        let table = &query.source.table;
        let columns = load_table_columns(connection, table)
            .map_err(|error| self.unavailable(error.to_string()))?;
        if columns.is_empty() {
            return Err(ExecutionError::SchemaMismatch {
                metric: query.metric_id.clone(),
                relation: table.clone(),
                missing: vec![table.clone()],
                cause: format!("table `{table}` does not exist"),
            });
        }

        let missing = missing_columns(&columns, query.source.referenced_columns());
        if !missing.is_empty() {
            return Err(ExecutionError::SchemaMismatch {
                metric: query.metric_id.clone(),
                relation: table.clone(),
                cause: format!("table `{table}` lacks columns: {}", missing.join(", ")),
                missing,
            });
        }

        Ok(())
    }

    fn classify(
        &self,
        failure: DeadlineFailure,
        metric: &str,
        relation: &str,
        timeout: Duration,
    ) -> ExecutionError {
        match failure {
            DeadlineFailure::TimedOut => ExecutionError::ExecutionTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            DeadlineFailure::Sqlite(error) => {
                let message = error.to_string();
                let drifted = message.contains("no such table")
                    || message.contains("no such column")
                    || matches!(
                        error,
                        rusqlite::Error::InvalidColumnType(..)
                            | rusqlite::Error::FromSqlConversionFailure(..)
                    );
                if drifted {
                    ExecutionError::SchemaMismatch {
                        metric: metric.to_string(),
                        relation: relation.to_string(),
                        missing: Vec::new(),
                        cause: message,
                    }
                } else {
                    self.unavailable(message)
                }
            }
        }
    }
}

impl DataStore for SqliteStore {
    fn fetch_buckets(
        &self,
        query: &CompiledQuery,
        timeout: Duration,
    ) -> Result<Vec<RawBucketRow>, ExecutionError> {
        let started = Instant::now();
        let connection = self.open_read_only(timeout)?;
        self.check_source_schema(&connection, query)?;

        let rendered = render_query(query);
        let budget = remaining_budget(&connection, started, timeout).map_err(|failure| {
            self.classify(failure, &query.metric_id, &query.source.table, timeout)
        })?;
        tracing::debug!(
            metric = %query.metric_id,
            budget_ms = budget.as_millis(),
            sql = %rendered.sql,
            "running bucket query"
        );
        run_with_deadline(&connection, budget, |connection| {
            let mut statement = connection.prepare(&rendered.sql)?;
            let rows = statement.query_map(params_from_iter(rendered.params.iter()), |row| {
                Ok(RawBucketRow {
                    bucket_start: row.get::<usize, Option<String>>(0)?,
                    value: row.get::<usize, f64>(1)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|failure| self.classify(failure, &query.metric_id, &query.source.table, timeout))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn query_text(&self, query: &CompiledQuery) -> Option<String> {
        Some(render_query(query).sql)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordTypeSummary {
    pub record_type: String,
    pub unit: Option<String>,
    pub records: i64,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

#[derive(Debug)]
enum DeadlineFailure {
    TimedOut,
    Sqlite(rusqlite::Error),
}

/// SQLite takes the busy wait as `i32` milliseconds; longer waits saturate.
fn set_busy_timeout(connection: &Connection, timeout: Duration) -> rusqlite::Result<()> {
    connection.busy_timeout(timeout.min(Duration::from_millis(MAX_QUERY_TIMEOUT_MS)))
}

/// What is left of `timeout` after setup since `started`. Lock waits are
/// narrowed to the same budget so the whole call stays within `timeout`.
fn remaining_budget(
    connection: &Connection,
    started: Instant,
    timeout: Duration,
) -> Result<Duration, DeadlineFailure> {
    let remaining = timeout.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        return Err(DeadlineFailure::TimedOut);
    }
    set_busy_timeout(connection, remaining).map_err(DeadlineFailure::Sqlite)?;
    Ok(remaining)
}

/// Runs `work` on `connection`, interrupting it from a watchdog thread once
/// `timeout` elapses.
fn run_with_deadline<T>(
    connection: &Connection,
    timeout: Duration,
    work: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T, DeadlineFailure> {
    let interrupt = connection.get_interrupt_handle();
    let (finished_tx, finished_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let watchdog = scope.spawn(move || match finished_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                interrupt.interrupt();
                true
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        });

        let outcome = work(connection);
        drop(finished_tx);
        let fired = watchdog.join().unwrap_or(false);

        match outcome {
            Ok(value) => Ok(value),
            Err(error)
                if fired || error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
            {
                Err(DeadlineFailure::TimedOut)
            }
            Err(error) => Err(DeadlineFailure::Sqlite(error)),
        }
    })
}

/// Column names of `table`; empty when the table does not exist.
fn load_table_columns(connection: &Connection, table: &str) -> rusqlite::Result<BTreeSet<String>> {
    let pragma_sql = format!("PRAGMA table_info({})", sqlite_single_quoted(table));
    let mut statement = connection.prepare(&pragma_sql)?;
    let names = statement.query_map([], |row| row.get::<usize, String>(1))?;
    names.collect()
}

fn missing_columns<'a>(
    present: &BTreeSet<String>,
    required: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    required
        .into_iter()
        .filter(|column| !present.contains(*column))
        .map(ToString::to_string)
        .collect()
}
