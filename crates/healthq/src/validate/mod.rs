//! Turns a loosely typed query spec into a [`ValidatedQuery`].
//!
//! Every rejection names the offending field, echoes the value, and states
//! the constraint, so an automated caller can fix the request and retry.

use serde_json::{Map, Number, Value, json};
use time::Date;

use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::config::QueryLimits;
use crate::models::{Aggregation, HealthQuerySpec, TimeGrain, TimeRangeSpec, all_time_grains};
use crate::utils::time::{CalendarDateError, format_calendar_date, parse_calendar_date};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed query spec at `{field}`: {reason}")]
    MalformedSpec {
        field: String,
        value: Value,
        reason: String,
    },

    #[error("unknown metric `{metric}`")]
    UnknownMetric { metric: String, known: Vec<String> },

    #[error(
        "aggregation {} is not supported for metric `{metric}` (allowed: {})",
        .value.as_deref().map_or_else(|| "<missing>".to_string(), |raw| format!("`{raw}`")),
        .allowed.join(", ")
    )]
    UnsupportedAggregation {
        metric: String,
        value: Option<String>,
        allowed: Vec<&'static str>,
    },

    #[error("invalid time_grain `{value}` (allowed: day, week, month)")]
    InvalidTimeGrain { value: String },

    #[error("limit must be a positive integer, got {value}")]
    InvalidLimit { value: Value },

    #[error("limit {value} exceeds the maximum of {max}")]
    LimitTooLarge { value: u64, max: u32 },

    #[error("{field} `{value}` is not a valid date: {}", .reason.as_str())]
    InvalidDateFormat {
        field: &'static str,
        value: String,
        reason: CalendarDateError,
    },

    #[error("time_range.start {start} is after time_range.end {end}")]
    InvalidTimeRange { start: String, end: String },
}

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedSpec { .. } => "malformed_spec",
            Self::UnknownMetric { .. } => "unknown_metric",
            Self::UnsupportedAggregation { .. } => "unsupported_aggregation",
            Self::InvalidTimeGrain { .. } => "invalid_time_grain",
            Self::InvalidLimit { .. } => "invalid_limit",
            Self::LimitTooLarge { .. } => "limit_too_large",
            Self::InvalidDateFormat { .. } => "invalid_date_format",
            Self::InvalidTimeRange { .. } => "invalid_time_range",
        }
    }

    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::MalformedSpec { field, .. } => field,
            Self::UnknownMetric { .. } => "metric",
            Self::UnsupportedAggregation { .. } => "aggregation",
            Self::InvalidTimeGrain { .. } => "time_grain",
            Self::InvalidLimit { .. } | Self::LimitTooLarge { .. } => "limit",
            Self::InvalidDateFormat { field, .. } => field,
            Self::InvalidTimeRange { .. } => "time_range",
        }
    }

    /// Validation failures are never retried as-is.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        false
    }

    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::MalformedSpec { value, .. } | Self::InvalidLimit { value } => value.clone(),
            Self::UnknownMetric { metric, .. } => json!(metric),
            Self::UnsupportedAggregation { value, .. } => json!(value),
            Self::InvalidTimeGrain { value } => json!(value),
            Self::LimitTooLarge { value, .. } => json!(value),
            Self::InvalidDateFormat { value, .. } => json!(value),
            Self::InvalidTimeRange { start, end } => json!({ "start": start, "end": end }),
        }
    }

    #[must_use]
    pub fn expected(&self) -> Value {
        match self {
            Self::MalformedSpec { reason, .. } => json!(reason),
            Self::UnknownMetric { known, .. } => json!({ "one_of": known }),
            Self::UnsupportedAggregation { allowed, .. } => json!({ "one_of": allowed }),
            Self::InvalidTimeGrain { .. } => json!({
                "one_of": all_time_grains().map(TimeGrain::as_str)
            }),
            Self::InvalidLimit { .. } => json!({ "type": "integer", "minimum": 1 }),
            Self::LimitTooLarge { max, .. } => json!({
                "type": "integer",
                "minimum": 1,
                "maximum": max
            }),
            Self::InvalidDateFormat { reason, .. } => json!({
                "format": "YYYY-MM-DD",
                "reason": reason.as_str()
            }),
            Self::InvalidTimeRange { .. } => json!({ "constraint": "start <= end" }),
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        json!({
            "stage": "validation",
            "retryable": self.retryable(),
            "field": self.field(),
            "value": self.value(),
            "expected": self.expected(),
        })
    }
}

/// A request that passed every check. Borrows its metric from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery<'c> {
    pub metric: &'c MetricDefinition,
    pub aggregation: Aggregation,
    pub grain: TimeGrain,
    pub limit: u32,
    pub range: DateRange,
}

/// Inclusive calendar-date window; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl DateRange {
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Decodes a raw tool-call payload.
///
/// Unknown keys are ignored and `null` counts as absent. Scalars of the
/// wrong JSON type are kept in their JSON text form so the per-field checks
/// in [`validate`] report them with the right error kind.
pub fn parse_spec(payload: &Value) -> Result<HealthQuerySpec, ValidationError> {
    let Some(object) = payload.as_object() else {
        return Err(ValidationError::MalformedSpec {
            field: "$".to_string(),
            value: payload.clone(),
            reason: "query spec must be a JSON object".to_string(),
        });
    };

    let time_range = match object.get("time_range") {
        None | Some(Value::Null) => None,
        Some(Value::Object(range)) => Some(TimeRangeSpec {
            start: text_field(range, "start"),
            end: text_field(range, "end"),
        }),
        Some(other) => {
            return Err(ValidationError::MalformedSpec {
                field: "time_range".to_string(),
                value: other.clone(),
                reason: "time_range must be an object with optional `start` and `end`"
                    .to_string(),
            });
        }
    };

    Ok(HealthQuerySpec {
        metric: text_field(object, "metric").unwrap_or_default(),
        aggregation: text_field(object, "aggregation"),
        time_grain: text_field(object, "time_grain"),
        limit: limit_field(object)?,
        time_range,
    })
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Keeps any JSON integer, including ones past `i64`, so range errors are
/// reported by [`validate`] rather than as a type error here.
fn limit_field(object: &Map<String, Value>) -> Result<Option<Number>, ValidationError> {
    match object.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) if number.is_i64() || number.is_u64() => {
            Ok(Some(number.clone()))
        }
        Some(value) => Err(ValidationError::InvalidLimit {
            value: value.clone(),
        }),
    }
}

pub fn validate<'c>(
    catalog: &'c MetricCatalog,
    limits: &QueryLimits,
    spec: &HealthQuerySpec,
) -> Result<ValidatedQuery<'c>, ValidationError> {
    let metric = catalog
        .lookup(&spec.metric)
        .ok_or_else(|| ValidationError::UnknownMetric {
            metric: spec.metric.clone(),
            known: catalog.metric_ids().into_iter().map(str::to_string).collect(),
        })?;

    let aggregation = spec
        .aggregation
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .and_then(Aggregation::parse)
        .filter(|aggregation| metric.allows(*aggregation))
        .ok_or_else(|| ValidationError::UnsupportedAggregation {
            metric: metric.id.clone(),
            value: spec.aggregation.clone(),
            allowed: metric.allowed_aggregation_names(),
        })?;

    let grain = match spec.time_grain.as_deref() {
        None => metric.default_grain,
        Some(raw) => TimeGrain::parse(raw).ok_or_else(|| ValidationError::InvalidTimeGrain {
            value: raw.to_string(),
        })?,
    };

    let limit = match &spec.limit {
        None => limits.default_limit(),
        Some(number) => match number.as_u64().filter(|value| *value > 0) {
            None => {
                return Err(ValidationError::InvalidLimit {
                    value: Value::Number(number.clone()),
                });
            }
            Some(value) => u32::try_from(value)
                .ok()
                .filter(|limit| *limit <= limits.max_limit())
                .ok_or(ValidationError::LimitTooLarge {
                    value,
                    max: limits.max_limit(),
                })?,
        },
    };

    let range = validate_range(spec.time_range.as_ref())?;

    Ok(ValidatedQuery {
        metric,
        aggregation,
        grain,
        limit,
        range,
    })
}

fn validate_range(range: Option<&TimeRangeSpec>) -> Result<DateRange, ValidationError> {
    let Some(range) = range else {
        return Ok(DateRange::default());
    };

    let start = parse_bound("time_range.start", range.start.as_deref())?;
    let end = parse_bound("time_range.end", range.end.as_deref())?;
    if let (Some(start), Some(end)) = (start, end)
        && start > end
    {
        return Err(ValidationError::InvalidTimeRange {
            start: format_calendar_date(start),
            end: format_calendar_date(end),
        });
    }

    Ok(DateRange { start, end })
}

fn parse_bound(field: &'static str, raw: Option<&str>) -> Result<Option<Date>, ValidationError> {
    raw.map(|value| {
        parse_calendar_date(value).map_err(|reason| ValidationError::InvalidDateFormat {
            field,
            value: value.to_string(),
            reason,
        })
    })
    .transpose()
}
