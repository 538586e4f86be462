use anyhow::{Error, Result};
use clap::Args;
use serde_json::json;

use super::{database_label, print_envelope};
use crate::config::{QueryLimits, RuntimePaths};
use crate::engine::QueryError;
use crate::models::QueryEnvelope;
use crate::sqlite::SqliteStore;

const COMMAND: &str = "explore";

#[derive(Debug, Clone, Args)]
pub struct ExploreArgs {
    /// Number of record types to list, most frequent first.
    #[arg(long, default_value_t = 25)]
    pub limit: u32,
}

pub fn run(args: &ExploreArgs, runtime_paths: &RuntimePaths, limits: QueryLimits) -> Result<()> {
    let store = SqliteStore::new(&runtime_paths.database_path);
    let summary = store
        .record_type_summary(args.limit, limits.timeout())
        .map_err(|error| {
            Error::new(
                QueryError::from(error)
                    .into_command_failure(COMMAND)
                    .map_envelope(|envelope| {
                        envelope.with_meta("database", database_label(store.path()))
                    }),
            )
        })?;

    let envelope = QueryEnvelope::ok(COMMAND, json!({ "record_types": summary }))
        .with_meta("row_count", json!(summary.len()))
        .with_meta("limit", json!(args.limit))
        .with_meta("database", database_label(store.path()));

    print_envelope(&envelope)
}
