use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use super::commands::{
    catalog::CatalogArgs, explain::ExplainArgs, explore::ExploreArgs, query::QueryArgs,
    schema::SchemaArgs,
};
use crate::config::{DEFAULT_MAX_LIMIT, DEFAULT_QUERY_TIMEOUT_MS, PathOverrides, QueryLimits};

#[derive(Debug, Parser)]
#[command(
    name = "healthq",
    version,
    about = "Validated, bucketed aggregation queries over exported health records"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Metric catalog JSON; the built-in catalog is used when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = DEFAULT_MAX_LIMIT)]
    pub max_limit: u32,

    #[arg(long, global = true, default_value_t = DEFAULT_QUERY_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

impl RuntimeArgs {
    #[must_use]
    pub fn path_overrides(&self) -> PathOverrides<'_> {
        PathOverrides {
            data_dir: self.data_dir.as_deref(),
            database: self.database.as_deref(),
            catalog: self.catalog.as_deref(),
        }
    }

    pub fn query_limits(&self) -> Result<QueryLimits> {
        QueryLimits::new(self.max_limit, Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a query spec against the records database.
    Query(QueryArgs),
    /// Show the compiled query and SQL for a spec without running it.
    Explain(ExplainArgs),
    /// List the metrics the catalog exposes.
    Catalog(CatalogArgs),
    /// Print the tool definition hosts advertise to the model.
    Schema(SchemaArgs),
    /// Summarise record types present in the database.
    Explore(ExploreArgs),
}
