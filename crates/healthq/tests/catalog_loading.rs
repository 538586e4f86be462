use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use healthq::catalog::{CatalogError, MetricCatalog, ValueCast};
use healthq::models::{Aggregation, TimeGrain};
use serde_json::{Value, json};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn catalog_document(metrics: Value) -> Value {
    json!({
        "schema_version": "healthq.metric-catalog.v1",
        "table": "healthkit_records",
        "metrics": metrics
    })
}

fn load(document: &Value) -> Result<MetricCatalog, CatalogError> {
    MetricCatalog::from_json_str(&document.to_string())
}

#[test]
fn loads_catalog_file_with_dedicated_table_metric() {
    let temp = unique_temp_dir("healthq-catalog-file");
    std::fs::create_dir_all(&temp).expect("temp dir should be creatable");
    let path = temp.join("metrics.json");
    let document = json!({
        "schema_version": "healthq.metric-catalog.v1",
        "defaults": { "time_grain": "week", "cast": "integer" },
        "metrics": [
            {
                "id": "daily_flights",
                "record_type": "HKQuantityTypeIdentifierFlightsClimbed",
                "unit": "count",
                "aggregations": ["sum", "max"]
            },
            {
                "id": "mood",
                "table": "mood_log",
                "unit": "score",
                "aggregations": ["avg"],
                "default_grain": "day",
                "cast": "double"
            }
        ]
    });
    std::fs::write(&path, document.to_string()).expect("catalog should be writable");

    let catalog = MetricCatalog::load(&path).expect("catalog file should load");

    assert_eq!(catalog.metric_ids(), vec!["daily_flights", "mood"]);
    let flights = catalog
        .lookup("daily_flights")
        .expect("flights should be cataloged");
    assert_eq!(flights.default_grain, TimeGrain::Week);
    assert_eq!(flights.source.cast, ValueCast::Integer);
    assert_eq!(flights.source.table, "healthkit_records");

    let mood = catalog.lookup("mood").expect("mood should be cataloged");
    assert_eq!(mood.source.table, "mood_log");
    assert!(mood.source.filters.is_empty());
    assert_eq!(mood.default_grain, TimeGrain::Day);
    assert_eq!(mood.source.cast, ValueCast::Double);
}

#[test]
fn lookup_is_exact_and_case_sensitive() {
    let catalog = MetricCatalog::builtin().expect("builtin catalog should load");

    assert!(catalog.lookup("step_count").is_some());
    assert!(catalog.lookup("Step_Count").is_none());
    assert!(catalog.lookup(" step_count").is_none());
}

#[test]
fn every_builtin_metric_allows_at_least_one_aggregation() {
    let catalog = MetricCatalog::builtin().expect("builtin catalog should load");

    assert_eq!(catalog.len(), 10);
    for metric in catalog.iter() {
        assert!(
            !metric.allowed_aggregations.is_empty(),
            "{} has no aggregations",
            metric.id
        );
        assert!(
            metric.allows(Aggregation::Count),
            "{} should support count",
            metric.id
        );
    }
}

#[test]
fn rejects_duplicate_metric_ids() {
    let error = load(&catalog_document(json!([
        { "id": "steps", "record_type": "A", "unit": "count", "aggregations": ["sum"] },
        { "id": "steps", "record_type": "B", "unit": "count", "aggregations": ["sum"] }
    ])))
    .expect_err("duplicate ids must fail");

    assert!(matches!(error, CatalogError::DuplicateMetric { ref id } if id == "steps"));
}

#[test]
fn rejects_empty_aggregation_set() {
    let error = load(&catalog_document(json!([
        { "id": "steps", "record_type": "A", "unit": "count", "aggregations": [] }
    ])))
    .expect_err("empty aggregations must fail");

    assert!(matches!(error, CatalogError::EmptyAggregations { .. }));
}

#[test]
fn shared_table_metric_requires_record_type() {
    let error = load(&catalog_document(json!([
        { "id": "steps", "unit": "count", "aggregations": ["sum"] }
    ])))
    .expect_err("missing record_type must fail");

    assert!(matches!(
        error,
        CatalogError::MissingField {
            field: "record_type",
            ..
        }
    ));
}

#[test]
fn rejects_blank_unit() {
    let error = load(&catalog_document(json!([
        { "id": "steps", "record_type": "A", "unit": "  ", "aggregations": ["sum"] }
    ])))
    .expect_err("blank unit must fail");

    assert!(matches!(error, CatalogError::MissingField { field: "unit", .. }));
}

#[test]
fn rejects_non_identifier_table_names() {
    let error = load(&catalog_document(json!([
        {
            "id": "steps",
            "table": "records; DROP TABLE records",
            "unit": "count",
            "aggregations": ["sum"]
        }
    ])))
    .expect_err("injected table name must fail");

    assert!(matches!(
        error,
        CatalogError::InvalidIdentifier { field: "table", .. }
    ));
}

#[test]
fn rejects_unknown_aggregation_and_unknown_keys() {
    let unknown_aggregation = load(&catalog_document(json!([
        { "id": "steps", "record_type": "A", "unit": "count", "aggregations": ["median"] }
    ])))
    .expect_err("unknown aggregation must fail");
    assert!(matches!(unknown_aggregation, CatalogError::Parse(_)));

    let unknown_key = load(&catalog_document(json!([
        {
            "id": "steps",
            "record_type": "A",
            "unit": "count",
            "aggregations": ["sum"],
            "colour": "blue"
        }
    ])))
    .expect_err("unknown key must fail");
    assert!(matches!(unknown_key, CatalogError::Parse(_)));
}

#[test]
fn rejects_other_schema_versions_and_empty_catalogs() {
    let wrong_version = MetricCatalog::from_json_str(
        &json!({ "schema_version": "healthq.metric-catalog.v0", "metrics": [] }).to_string(),
    )
    .expect_err("old schema version must fail");
    assert!(matches!(
        wrong_version,
        CatalogError::UnsupportedSchemaVersion { ref found } if found == "healthq.metric-catalog.v0"
    ));

    let empty = load(&catalog_document(json!([]))).expect_err("empty catalog must fail");
    assert!(matches!(empty, CatalogError::Empty));
}

#[test]
fn missing_catalog_file_reports_path() {
    let path = unique_temp_dir("healthq-catalog-missing").join("metrics.json");

    let error = MetricCatalog::load(&path).expect_err("missing file must fail");

    assert!(matches!(error, CatalogError::Read { .. }));
    assert!(error.to_string().contains("metrics.json"));
}
