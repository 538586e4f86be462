use std::time::{Duration, Instant};

use serde_json::{Value, json};
use time::Date;

use crate::compile::CompiledQuery;
use crate::utils::time::parse_calendar_date;

/// One aggregated row as a backend returns it, before bucket labels are
/// checked.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBucketRow {
    /// `None` when the backend could not derive a calendar date for the group.
    pub bucket_start: Option<String>,
    pub value: f64,
}

/// Seam between the engine and whatever holds the records.
///
/// Implementations must return rows ordered by bucket start ascending and
/// must not return more than `query.fetch_limit()` rows. They must give up
/// with [`ExecutionError::ExecutionTimeout`] once `timeout` has elapsed.
pub trait DataStore: Send + Sync {
    fn fetch_buckets(
        &self,
        query: &CompiledQuery,
        timeout: Duration,
    ) -> Result<Vec<RawBucketRow>, ExecutionError>;

    /// Short label used in errors and logs.
    fn describe(&self) -> String;

    /// Backend-native text of `query`, when the backend has one.
    fn query_text(&self, _query: &CompiledQuery) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("data store `{store}` is unavailable: {cause}")]
    DataStoreUnavailable { store: String, cause: String },

    #[error("data store does not match the catalog for metric `{metric}` ({relation}): {cause}")]
    SchemaMismatch {
        metric: String,
        relation: String,
        missing: Vec<String>,
        cause: String,
    },

    #[error("query did not finish within {timeout_ms} ms")]
    ExecutionTimeout { timeout_ms: u64 },
}

impl ExecutionError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DataStoreUnavailable { .. } => "data_store_unavailable",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::ExecutionTimeout { .. } => "execution_timeout",
        }
    }

    /// Schema drift needs an operator; the other two may clear up on their own.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::DataStoreUnavailable { .. } | Self::ExecutionTimeout { .. } => true,
            Self::SchemaMismatch { .. } => false,
        }
    }

    #[must_use]
    pub const fn retry_hint(&self) -> &'static str {
        match self {
            Self::DataStoreUnavailable { .. } => "retry_with_backoff",
            Self::ExecutionTimeout { .. } => "narrow_time_range_or_retry",
            Self::SchemaMismatch { .. } => "alert_operator",
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = json!({
            "stage": "execution",
            "retryable": self.retryable(),
            "retry_hint": self.retry_hint(),
        });
        match self {
            Self::DataStoreUnavailable { store, .. } => {
                details["store"] = json!(store);
            }
            Self::SchemaMismatch {
                metric,
                relation,
                missing,
                ..
            } => {
                details["metric"] = json!(metric);
                details["relation"] = json!(relation);
                details["missing"] = json!(missing);
            }
            Self::ExecutionTimeout { timeout_ms } => {
                details["timeout_ms"] = json!(timeout_ms);
            }
        }
        details
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: Date,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub buckets: Vec<Bucket>,
    /// More buckets matched than `row_cap` allowed.
    pub truncated: bool,
    pub duration_ms: u64,
}

pub fn execute(
    store: &dyn DataStore,
    query: &CompiledQuery,
    timeout: Duration,
) -> Result<ExecutionResult, ExecutionError> {
    let started = Instant::now();
    let rows = match store.fetch_buckets(query, timeout) {
        Ok(rows) => rows,
        Err(error) => {
            report_failure(store, query, &error);
            return Err(error);
        }
    };

    let row_cap = usize::try_from(query.row_cap).unwrap_or(usize::MAX);
    let truncated = rows.len() > row_cap;
    let mut buckets = Vec::with_capacity(rows.len().min(row_cap));
    for row in rows.into_iter().take(row_cap) {
        match bucket_from_row(query, row) {
            Ok(bucket) => buckets.push(bucket),
            Err(error) => {
                report_failure(store, query, &error);
                return Err(error);
            }
        }
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::debug!(
        metric = %query.metric_id,
        buckets = buckets.len(),
        truncated,
        duration_ms,
        "query executed"
    );

    Ok(ExecutionResult {
        buckets,
        truncated,
        duration_ms,
    })
}

fn bucket_from_row(query: &CompiledQuery, row: RawBucketRow) -> Result<Bucket, ExecutionError> {
    let mismatch = |cause: String| ExecutionError::SchemaMismatch {
        metric: query.metric_id.clone(),
        relation: query.source.table.clone(),
        missing: Vec::new(),
        cause,
    };

    let Some(label) = row.bucket_start else {
        return Err(mismatch(format!(
            "column `{}` holds values that are not dates",
            query.source.date_column
        )));
    };
    let start = parse_calendar_date(&label).map_err(|reason| {
        mismatch(format!(
            "bucket label `{label}` derived from `{}` is not a calendar date ({})",
            query.source.date_column,
            reason.as_str()
        ))
    })?;
    if !row.value.is_finite() {
        return Err(mismatch(format!(
            "aggregate over `{}` for bucket {label} is not a finite number",
            query.source.value_column
        )));
    }

    Ok(Bucket {
        start,
        value: row.value,
    })
}

fn report_failure(store: &dyn DataStore, query: &CompiledQuery, error: &ExecutionError) {
    match error {
        ExecutionError::SchemaMismatch { .. } => tracing::error!(
            metric = %query.metric_id,
            store = %store.describe(),
            error = %error,
            "catalog and data store disagree"
        ),
        ExecutionError::DataStoreUnavailable { .. } | ExecutionError::ExecutionTimeout { .. } => {
            tracing::warn!(
                metric = %query.metric_id,
                store = %store.describe(),
                error = %error,
                "query execution failed"
            );
        }
    }
}
