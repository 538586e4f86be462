use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};

pub const TOOL_NAME: &str = "healthkit_query";
pub const DEFAULT_LIMIT: u32 = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

impl Aggregation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        all_aggregations()
            .into_iter()
            .find(|candidate| candidate.as_str() == raw)
    }
}

#[must_use]
pub const fn all_aggregations() -> [Aggregation; 5] {
    [
        Aggregation::Avg,
        Aggregation::Sum,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Count,
    ]
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
}

impl TimeGrain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        all_time_grains()
            .into_iter()
            .find(|candidate| candidate.as_str() == raw)
    }
}

#[must_use]
pub const fn all_time_grains() -> [TimeGrain; 3] {
    [TimeGrain::Day, TimeGrain::Week, TimeGrain::Month]
}

/// Optional inclusive date window applied to `startDate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeRangeSpec {
    /// Inclusive start date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Inclusive end date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// Arguments of the `healthkit_query` tool.
///
/// Fields stay loosely typed here; [`crate::validate`] turns them into a
/// `ValidatedQuery` or a structured error the caller can act on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HealthQuerySpec {
    /// Logical metric name from the metric catalog, e.g. "heart_rate",
    /// "step_count", "active_energy_burned".
    pub metric: String,

    /// Aggregation applied within each time bucket. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Aggregation>")]
    pub aggregation: Option<String>,

    /// Time bucket for grouping results. Defaults to the metric's grain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<TimeGrain>")]
    pub time_grain: Option<String>,

    /// Maximum number of buckets to return. Defaults to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<u32>")]
    pub limit: Option<Number>,

    /// Optional inclusive date window on the record start date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRangeSpec>,
}

/// Parameter schema for the tool definition. `aggregation` and the lower
/// bound on `limit` are enforced by the validator rather than by serde, so
/// they are added to the derived schema here.
#[must_use]
pub fn json_schema() -> Value {
    let mut schema = schemars::schema_for!(HealthQuerySpec).to_value();
    if let Some(object) = schema.as_object_mut()
        && let Some(required) = object
            .entry("required")
            .or_insert_with(|| json!([]))
            .as_array_mut()
        && !required
            .iter()
            .any(|field| field.as_str() == Some("aggregation"))
    {
        required.push(json!("aggregation"));
    }
    if let Some(limit) = schema
        .pointer_mut("/properties/limit")
        .and_then(Value::as_object_mut)
    {
        limit.insert("minimum".to_string(), json!(1));
    }
    schema
}

/// Function-calling tool definition advertised to the chat model.
#[must_use]
pub fn tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": TOOL_NAME,
            "description": "Query the user's Apple HealthKit data via a semantic layer. \
                Use this whenever the user asks about metrics like heart rate, steps, \
                active energy, sleep, VO2 max, etc.",
            "parameters": json_schema(),
        }
    })
}
