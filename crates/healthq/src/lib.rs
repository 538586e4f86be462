#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod compile;
pub mod config;
pub mod engine;
pub mod execute;
pub mod format;
pub mod models;
pub mod sqlite;
pub mod utils;
pub mod validate;

pub use catalog::MetricCatalog;
pub use cli::app::{Cli, Command};
pub use engine::{HealthQueryEngine, QueryError, QueryOutcome};
pub use execute::DataStore;
pub use sqlite::SqliteStore;
