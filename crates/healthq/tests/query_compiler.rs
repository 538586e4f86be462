use healthq::catalog::MetricCatalog;
use healthq::compile::{Comparison, CompiledQuery, TimeBucket, compile};
use healthq::config::QueryLimits;
use healthq::models::{TimeGrain, all_time_grains};
use healthq::utils::time::bucket_start;
use healthq::validate::{parse_spec, validate};
use serde_json::{Value, json};
use time::macros::date;

fn compiled(payload: Value) -> CompiledQuery {
    let catalog = MetricCatalog::builtin().expect("builtin catalog should load");
    let spec = parse_spec(&payload).expect("payload should decode");
    let validated =
        validate(&catalog, &QueryLimits::default(), &spec).expect("spec should validate");
    compile(&validated)
}

#[test]
fn monthly_energy_sum_compiles_without_date_filter() {
    let query = compiled(json!({
        "metric": "active_energy_burned",
        "aggregation": "sum",
        "time_grain": "month",
        "limit": 12
    }));

    insta::assert_json_snapshot!(query, @r#"
    {
      "metric_id": "active_energy_burned",
      "source": {
        "table": "healthkit_records",
        "date_column": "startDate",
        "value_column": "value",
        "cast": "double",
        "filters": [
          {
            "column": "type",
            "value": "HKQuantityTypeIdentifierActiveEnergyBurned"
          },
          {
            "column": "unit",
            "value": "kcal"
          }
        ]
      },
      "bucket": "calendar_month",
      "aggregation": "sum",
      "predicates": [],
      "order": "ascending",
      "row_cap": 12
    }
    "#);
}

#[test]
fn row_cap_always_equals_validated_limit() {
    let catalog = MetricCatalog::builtin().expect("builtin catalog should load");
    let limits = QueryLimits::default();
    for limit in [1, 7, 100, 1_000] {
        let spec = parse_spec(&json!({
            "metric": "step_count",
            "aggregation": "sum",
            "limit": limit
        }))
        .expect("payload should decode");
        let validated = validate(&catalog, &limits, &spec).expect("spec should validate");

        let query = compile(&validated);

        assert_eq!(query.row_cap, validated.limit);
        assert_eq!(query.fetch_limit(), u64::from(validated.limit) + 1);
    }
}

#[test]
fn inclusive_predicates_only_for_present_bounds() {
    let both = compiled(json!({
        "metric": "heart_rate",
        "aggregation": "avg",
        "time_range": { "start": "2024-01-01", "end": "2024-01-31" }
    }));
    assert_eq!(both.predicates.len(), 2);
    assert_eq!(both.predicates[0].comparison, Comparison::GreaterOrEqual);
    assert_eq!(both.predicates[0].date, date!(2024 - 01 - 01));
    assert_eq!(both.predicates[1].comparison, Comparison::LessOrEqual);
    assert_eq!(both.predicates[1].date, date!(2024 - 01 - 31));
    assert!(
        both.predicates
            .iter()
            .all(|predicate| predicate.column == "startDate")
    );

    let start_only = compiled(json!({
        "metric": "heart_rate",
        "aggregation": "avg",
        "time_range": { "start": "2024-01-01" }
    }));
    assert_eq!(start_only.predicates.len(), 1);
    assert_eq!(
        start_only.predicates[0].comparison,
        Comparison::GreaterOrEqual
    );
}

#[test]
fn grains_map_to_calendar_buckets() {
    let week = compiled(json!({
        "metric": "body_mass",
        "aggregation": "avg"
    }));
    assert_eq!(week.bucket, TimeBucket::IsoWeekMonday);

    let day = compiled(json!({
        "metric": "body_mass",
        "aggregation": "avg",
        "time_grain": "day"
    }));
    assert_eq!(day.bucket, TimeBucket::CalendarDay);

    for grain in all_time_grains() {
        assert_eq!(TimeBucket::for_grain(grain).grain(), grain);
    }
}

#[test]
fn bucket_starts_follow_calendar_rules() {
    // 2024-03-14 is a Thursday.
    let day = date!(2024 - 03 - 14);
    assert_eq!(bucket_start(day, TimeGrain::Day), day);
    assert_eq!(bucket_start(day, TimeGrain::Week), date!(2024 - 03 - 11));
    assert_eq!(bucket_start(day, TimeGrain::Month), date!(2024 - 03 - 01));

    // Weeks straddling a year boundary start on the Monday before.
    assert_eq!(
        bucket_start(date!(2025 - 01 - 01), TimeGrain::Week),
        date!(2024 - 12 - 30)
    );
    assert_eq!(
        bucket_start(date!(2024 - 03 - 11), TimeGrain::Week),
        date!(2024 - 03 - 11)
    );
    assert_eq!(
        bucket_start(date!(2024 - 03 - 17), TimeGrain::Week),
        date!(2024 - 03 - 11)
    );
}

#[test]
fn compiled_query_echoes_dates_as_calendar_strings() {
    let query = compiled(json!({
        "metric": "step_count",
        "aggregation": "count",
        "time_range": { "start": "2023-12-01", "end": "2024-02-01" }
    }));

    let encoded = serde_json::to_value(&query).expect("compiled query should serialize");

    assert_eq!(
        encoded["predicates"],
        json!([
            { "column": "startDate", "comparison": "greater_or_equal", "date": "2023-12-01" },
            { "column": "startDate", "comparison": "less_or_equal", "date": "2024-02-01" }
        ])
    );
}
