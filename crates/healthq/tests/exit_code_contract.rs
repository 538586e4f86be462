use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use healthq::models::HealthRecord;
use healthq::sqlite::write_records_to_sqlite;
use serde_json::{Value, json};

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_VALIDATION_FAILURE: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn healthq(home_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_healthq"))
        .arg("--home-dir")
        .arg(home_dir)
        .arg("--cwd")
        .arg(home_dir)
        .args(args)
        .output()
        .expect("command should execute")
}

fn stdout_envelope(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON envelope")
}

fn seeded_home(prefix: &str) -> PathBuf {
    let home = unique_temp_dir(prefix);
    let database = home.join(".healthq").join("healthkit_records.sqlite");
    write_records_to_sqlite(
        &database,
        &[
            HealthRecord::quantity(
                "HKQuantityTypeIdentifierActiveEnergyBurned",
                "kcal",
                "2024-01-15T08:00:00Z",
                420.5,
            ),
            HealthRecord::quantity(
                "HKQuantityTypeIdentifierActiveEnergyBurned",
                "kcal",
                "2024-02-03T08:00:00Z",
                300.0,
            ),
        ],
    )
    .expect("fixture database should write");
    home
}

#[test]
fn missing_spec_exits_with_usage_code() {
    let status = Command::new(env!("CARGO_BIN_EXE_healthq"))
        .arg("query")
        .status()
        .expect("command should execute");

    assert_eq!(status.code(), Some(EXIT_USAGE_ERROR));
}

#[test]
fn successful_query_prints_ok_envelope() {
    let home = seeded_home("healthq-exit-ok");

    let output = healthq(
        &home,
        &[
            "query",
            r#"{"metric":"active_energy_burned","aggregation":"sum","time_grain":"month","limit":12}"#,
        ],
    );

    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_envelope(&output);
    assert_eq!(envelope["ok"], json!(true));
    assert_eq!(envelope["command"], json!("healthkit_query"));
    assert_eq!(envelope["data"]["unit"], json!("kcal"));
    assert_eq!(
        envelope["data"]["buckets"],
        json!([
            { "bucket_start": "2024-01-01", "value": 420.5 },
            { "bucket_start": "2024-02-01", "value": 300.0 }
        ])
    );
    assert_eq!(envelope["meta"]["row_cap"], json!(12));
}

#[test]
fn validation_failures_exit_with_validation_code() {
    let home = seeded_home("healthq-exit-validation");

    let output = healthq(
        &home,
        &[
            "query",
            r#"{"metric":"active_energy_burned","aggregation":"median"}"#,
        ],
    );

    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));
    let envelope = stdout_envelope(&output);
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("unsupported_aggregation"));
    assert_eq!(envelope["error"]["details"]["field"], json!("aggregation"));
}

#[test]
fn invalid_json_spec_is_a_validation_failure() {
    let home = unique_temp_dir("healthq-exit-bad-json");

    let output = healthq(&home, &["explain", "{metric: steps"]);

    assert_eq!(output.status.code(), Some(EXIT_VALIDATION_FAILURE));
    assert_eq!(
        stdout_envelope(&output)["error"]["code"],
        json!("malformed_spec")
    );
}

#[test]
fn missing_database_exits_with_runtime_code() {
    let home = unique_temp_dir("healthq-exit-no-db");

    let output = healthq(
        &home,
        &["query", r#"{"metric":"step_count","aggregation":"sum"}"#],
    );

    assert_eq!(output.status.code(), Some(EXIT_RUNTIME_FAILURE));
    let envelope = stdout_envelope(&output);
    assert_eq!(envelope["error"]["code"], json!("data_store_unavailable"));
    assert_eq!(envelope["error"]["details"]["retryable"], json!(true));
}

#[test]
fn runtime_path_resolution_failures_exit_with_runtime_code() {
    let status = Command::new(env!("CARGO_BIN_EXE_healthq"))
        .args(["--home-dir", "relative", "catalog"])
        .status()
        .expect("command should execute");

    assert_eq!(status.code(), Some(EXIT_RUNTIME_FAILURE));
}

#[test]
fn explain_renders_sql_without_a_database() {
    let home = unique_temp_dir("healthq-exit-explain");

    let output = healthq(
        &home,
        &[
            "explain",
            r#"{"metric":"step_count","aggregation":"sum","time_range":{"start":"2024-01-01"}}"#,
        ],
    );

    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_envelope(&output);
    assert_eq!(envelope["command"], json!("explain"));
    assert!(
        envelope["data"]["sql"]
            .as_str()
            .is_some_and(|sql| sql.contains("ELSE \"startDate\" END)) >= ?3"))
    );
    assert_eq!(
        envelope["data"]["params"],
        json!([
            "HKQuantityTypeIdentifierStepCount",
            "count",
            "2024-01-01",
            101
        ])
    );
}

#[test]
fn schema_and_catalog_succeed_without_a_database() {
    let home = unique_temp_dir("healthq-exit-schema");

    let schema = healthq(&home, &["schema", "--raw"]);
    assert_eq!(schema.status.code(), Some(EXIT_SUCCESS));
    let definition = stdout_envelope(&schema);
    assert_eq!(definition["function"]["name"], json!("healthkit_query"));

    let catalog = healthq(&home, &["catalog"]);
    assert_eq!(catalog.status.code(), Some(EXIT_SUCCESS));
    let envelope = stdout_envelope(&catalog);
    assert_eq!(envelope["meta"]["metric_count"], json!(10));
}

#[test]
fn broken_catalog_exits_with_runtime_code() {
    let home = unique_temp_dir("healthq-exit-bad-catalog");
    std::fs::create_dir_all(&home).expect("home dir should be creatable");
    let catalog = home.join("metrics.json");
    std::fs::write(&catalog, r#"{"schema_version":"healthq.metric-catalog.v1","metrics":[]}"#)
        .expect("catalog should be writable");

    let output = healthq(
        &home,
        &[
            "--catalog",
            catalog.to_str().expect("temp path should be UTF-8"),
            "catalog",
        ],
    );

    assert_eq!(output.status.code(), Some(EXIT_RUNTIME_FAILURE));
    assert_eq!(
        stdout_envelope(&output)["error"]["code"],
        json!("catalog_invalid")
    );
}
