use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_json::json;

use super::{load_catalog, print_envelope};
use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::config::RuntimePaths;
use crate::models::QueryEnvelope;

const COMMAND: &str = "catalog";

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    /// Include storage details for each metric.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSummary<'a> {
    pub id: &'a str,
    pub unit: &'a str,
    pub aggregations: Vec<&'static str>,
    pub default_grain: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

impl<'a> MetricSummary<'a> {
    fn from_definition(definition: &'a MetricDefinition) -> Self {
        Self {
            id: &definition.id,
            unit: &definition.unit,
            aggregations: definition.allowed_aggregation_names(),
            default_grain: definition.default_grain.as_str(),
            description: definition.description.as_deref(),
        }
    }
}

pub fn run(args: &CatalogArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let catalog = load_catalog(runtime_paths, COMMAND)?;
    print_envelope(&catalog_envelope(&catalog, args.verbose))
}

#[must_use]
pub fn catalog_envelope(catalog: &MetricCatalog, verbose: bool) -> QueryEnvelope {
    let metrics = if verbose {
        json!(catalog.iter().collect::<Vec<_>>())
    } else {
        json!(
            catalog
                .iter()
                .map(MetricSummary::from_definition)
                .collect::<Vec<_>>()
        )
    };

    QueryEnvelope::ok(COMMAND, json!({ "metrics": metrics }))
        .with_meta("metric_count", json!(catalog.len()))
        .with_meta("verbose", json!(verbose))
}
