use anyhow::{Error, Result};
use clap::Args;
use rusqlite::types::Value as SqlValue;
use serde_json::{Value, json};

use super::{SpecInputArgs, build_engine, print_envelope};
use crate::config::{QueryLimits, RuntimePaths};
use crate::engine::QueryError;
use crate::models::QueryEnvelope;
use crate::sqlite::render_query;
use crate::validate::parse_spec;

const COMMAND: &str = "explain";

#[derive(Debug, Clone, Args)]
pub struct ExplainArgs {
    #[command(flatten)]
    pub input: SpecInputArgs,
}

/// Validates and compiles a spec and shows the SQL it would run, without
/// opening the database.
pub fn run(args: &ExplainArgs, runtime_paths: &RuntimePaths, limits: QueryLimits) -> Result<()> {
    let payload = args.input.payload(COMMAND)?;
    let engine = build_engine(runtime_paths, limits, COMMAND)?;

    let compiled = parse_spec(&payload)
        .and_then(|spec| engine.plan(&spec))
        .map_err(|error| Error::new(QueryError::from(error).into_command_failure(COMMAND)))?;
    let rendered = render_query(&compiled);
    let params = rendered.params.iter().map(sql_param_json).collect::<Vec<_>>();

    let envelope = QueryEnvelope::ok(
        COMMAND,
        json!({
            "compiled": compiled,
            "sql": rendered.sql,
            "params": params,
        }),
    )
    .with_meta("row_cap", json!(compiled.row_cap))
    .with_meta("fetch_limit", json!(compiled.fetch_limit()));

    print_envelope(&envelope)
}

fn sql_param_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => json!(value),
        SqlValue::Real(value) => json!(value),
        SqlValue::Text(value) => json!(value),
        SqlValue::Blob(bytes) => json!(bytes.len()),
    }
}
