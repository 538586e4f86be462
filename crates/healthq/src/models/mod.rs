pub mod health_record;
pub mod query_envelope;
pub mod query_result;
pub mod query_spec;

pub use health_record::HealthRecord;
pub use query_envelope::{
    FailureClass, QUERY_ENVELOPE_SCHEMA_VERSION, QueryEnvelope, QueryEnvelopeCommandFailure,
    QueryEnvelopeError, QueryEnvelopeWarning,
};
pub use query_result::{BucketValue, QueryResult};
pub use query_spec::{
    Aggregation, DEFAULT_LIMIT, HealthQuerySpec, TOOL_NAME, TimeGrain, TimeRangeSpec,
    all_aggregations, all_time_grains, json_schema, tool_definition,
};
