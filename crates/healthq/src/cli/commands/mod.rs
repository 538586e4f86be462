pub mod catalog;
pub mod explain;
pub mod explore;
pub mod query;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Error, Result};
use clap::Args;
use serde_json::{Value, json};

use crate::catalog::MetricCatalog;
use crate::config::{QueryLimits, RuntimePaths};
use crate::engine::{HealthQueryEngine, QueryError};
use crate::models::{QueryEnvelope, QueryEnvelopeCommandFailure};
use crate::validate::ValidationError;

/// A spec given inline or read from a file.
#[derive(Debug, Clone, Args)]
pub struct SpecInputArgs {
    #[arg(
        value_name = "SPEC_JSON",
        required_unless_present = "spec_file",
        conflicts_with = "spec_file"
    )]
    pub spec: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub spec_file: Option<PathBuf>,
}

impl SpecInputArgs {
    /// Decodes the raw payload. Text that is not JSON is reported the same
    /// way a structurally wrong spec is.
    pub fn payload(&self, command: &str) -> Result<Value> {
        let raw = match (&self.spec, &self.spec_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read spec file: {}", path.display()))?,
            (None, None) => "{}".to_string(),
        };

        serde_json::from_str(&raw).map_err(|error| {
            let rejection = QueryError::from(ValidationError::MalformedSpec {
                field: "$".to_string(),
                value: Value::String(raw.clone()),
                reason: format!("spec is not valid JSON: {error}"),
            });
            Error::new(rejection.into_command_failure(command))
        })
    }
}

pub fn load_catalog(runtime_paths: &RuntimePaths, command: &str) -> Result<MetricCatalog> {
    let loaded = match runtime_paths.catalog_path.as_deref() {
        Some(path) => MetricCatalog::load(path),
        None => MetricCatalog::builtin(),
    };

    loaded.map_err(|error| {
        let source = runtime_paths
            .catalog_path
            .as_deref()
            .map_or_else(|| "builtin".to_string(), |path| path.display().to_string());
        Error::new(QueryEnvelopeCommandFailure::new(
            QueryEnvelope::error(command, "catalog_invalid", error.to_string())
                .with_meta("stage", json!("catalog"))
                .with_error_details(json!({ "catalog": source })),
        ))
    })
}

pub fn build_engine(
    runtime_paths: &RuntimePaths,
    limits: QueryLimits,
    command: &str,
) -> Result<HealthQueryEngine> {
    let catalog = load_catalog(runtime_paths, command)?;
    Ok(HealthQueryEngine::new(Arc::new(catalog), limits))
}

pub fn print_envelope(envelope: &QueryEnvelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).map_err(|error| {
        Error::new(QueryEnvelopeCommandFailure::new(
            QueryEnvelope::error(
                envelope.command.as_str(),
                "response_encode_failed",
                "failed to encode response",
            )
            .with_error_details(json!({ "cause": format!("{error:#}") })),
        ))
    })?;
    println!("{encoded}");
    Ok(())
}

fn database_label(path: &Path) -> Value {
    json!(path.display().to_string())
}
