use anyhow::{Error, Result};
use clap::Args;

use super::{SpecInputArgs, build_engine, database_label, print_envelope};
use crate::config::{QueryLimits, RuntimePaths};
use crate::models::TOOL_NAME;
use crate::sqlite::SqliteStore;

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub input: SpecInputArgs,
}

pub fn run(args: &QueryArgs, runtime_paths: &RuntimePaths, limits: QueryLimits) -> Result<()> {
    let payload = args.input.payload(TOOL_NAME)?;
    let engine = build_engine(runtime_paths, limits, TOOL_NAME)?;
    let store = SqliteStore::new(&runtime_paths.database_path);

    let envelope = engine.handle(&store, &payload).map_err(|failure| {
        Error::new(failure.map_envelope(|envelope| {
            envelope.with_meta("database", database_label(store.path()))
        }))
    })?;

    print_envelope(&envelope.with_meta("database", database_label(store.path())))
}
