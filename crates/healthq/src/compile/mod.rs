use serde::{Serialize, Serializer};
use time::Date;

use crate::catalog::MetricSource;
use crate::models::{Aggregation, TimeGrain};
use crate::utils::time::{bucket_start, format_calendar_date};
use crate::validate::ValidatedQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    CalendarDay,
    IsoWeekMonday,
    CalendarMonth,
}

impl TimeBucket {
    #[must_use]
    pub const fn for_grain(grain: TimeGrain) -> Self {
        match grain {
            TimeGrain::Day => Self::CalendarDay,
            TimeGrain::Week => Self::IsoWeekMonday,
            TimeGrain::Month => Self::CalendarMonth,
        }
    }

    #[must_use]
    pub const fn grain(self) -> TimeGrain {
        match self {
            Self::CalendarDay => TimeGrain::Day,
            Self::IsoWeekMonday => TimeGrain::Week,
            Self::CalendarMonth => TimeGrain::Month,
        }
    }

    /// Reference semantics every backend rendering must agree with.
    #[must_use]
    pub fn start_of(self, date: Date) -> Date {
        bucket_start(date, self.grain())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterOrEqual,
    LessOrEqual,
}

impl Comparison {
    #[must_use]
    pub const fn operator(self) -> &'static str {
        match self {
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
        }
    }
}

/// Inclusive bound on the UTC calendar date of `column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatePredicate {
    pub column: String,
    pub comparison: Comparison,
    #[serde(serialize_with = "serialize_calendar_date")]
    pub date: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketOrder {
    Ascending,
}

/// Backend-neutral description of one bucketed aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    pub metric_id: String,
    pub source: MetricSource,
    pub bucket: TimeBucket,
    pub aggregation: Aggregation,
    pub predicates: Vec<DatePredicate>,
    pub order: BucketOrder,
    pub row_cap: u32,
}

impl CompiledQuery {
    /// Rows a backend should return: one past the cap, so truncation is
    /// observable without a second count query.
    #[must_use]
    pub fn fetch_limit(&self) -> u64 {
        u64::from(self.row_cap) + 1
    }
}

#[must_use]
pub fn compile(query: &ValidatedQuery<'_>) -> CompiledQuery {
    let source = query.metric.source.clone();
    let mut predicates = Vec::with_capacity(2);
    if let Some(start) = query.range.start {
        predicates.push(DatePredicate {
            column: source.date_column.clone(),
            comparison: Comparison::GreaterOrEqual,
            date: start,
        });
    }
    if let Some(end) = query.range.end {
        predicates.push(DatePredicate {
            column: source.date_column.clone(),
            comparison: Comparison::LessOrEqual,
            date: end,
        });
    }

    CompiledQuery {
        metric_id: query.metric.id.clone(),
        source,
        bucket: TimeBucket::for_grain(query.grain),
        aggregation: query.aggregation,
        predicates,
        order: BucketOrder::Ascending,
        row_cap: query.limit,
    }
}

fn serialize_calendar_date<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_calendar_date(*date))
}
