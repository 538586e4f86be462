use serde::{Deserialize, Serialize};

use super::{Aggregation, TimeGrain};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketValue {
    pub bucket_start: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub metric: String,
    pub unit: String,
    pub aggregation: Aggregation,
    pub grain: TimeGrain,
    pub buckets: Vec<BucketValue>,
    pub row_count: usize,
    pub truncated: bool,
}
