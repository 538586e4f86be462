use crate::execute::ExecutionResult;
use crate::models::{BucketValue, QueryResult};
use crate::utils::time::format_calendar_date;
use crate::validate::ValidatedQuery;

/// Shapes executor output into the caller-facing result. Metric, unit,
/// aggregation and grain echo the validated request, not the raw spec.
#[must_use]
pub fn format_result(execution: &ExecutionResult, query: &ValidatedQuery<'_>) -> QueryResult {
    let buckets = execution
        .buckets
        .iter()
        .map(|bucket| BucketValue {
            bucket_start: format_calendar_date(bucket.start),
            value: bucket.value,
        })
        .collect::<Vec<_>>();

    QueryResult {
        metric: query.metric.id.clone(),
        unit: query.metric.unit.clone(),
        aggregation: query.aggregation,
        grain: query.grain,
        row_count: buckets.len(),
        buckets,
        truncated: execution.truncated,
    }
}
