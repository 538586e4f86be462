//! Metric catalog: the static map from metric ids to where their samples
//! live, how they are displayed, and which aggregations make sense.
//!
//! A catalog is loaded once and never mutated, so a single instance can be
//! shared across threads without locking.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Aggregation, TimeGrain};

pub const CATALOG_SCHEMA_VERSION: &str = "healthq.metric-catalog.v1";
pub const DEFAULT_TABLE: &str = "healthkit_records";

const BUILTIN_CATALOG_JSON: &str = include_str!("../../catalog/metrics.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read metric catalog {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metric catalog is not valid: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(
        "unsupported metric catalog schema_version `{found}` (expected `{}`)",
        CATALOG_SCHEMA_VERSION
    )]
    UnsupportedSchemaVersion { found: String },

    #[error("metric catalog defines no metrics")]
    Empty,

    #[error("duplicate metric id `{id}`")]
    DuplicateMetric { id: String },

    #[error("metric `{metric}` is missing required field `{field}`")]
    MissingField { metric: String, field: &'static str },

    #[error("metric `{metric}` allows no aggregations")]
    EmptyAggregations { metric: String },

    #[error("`{value}` is not a plain SQL identifier (metric `{metric}`, field `{field}`)")]
    InvalidIdentifier {
        metric: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueCast {
    Double,
    Integer,
}

/// Equality predicate that narrows a shared table down to one metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFilter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSource {
    pub table: String,
    pub date_column: String,
    pub value_column: String,
    pub cast: ValueCast,
    pub filters: Vec<SourceFilter>,
}

impl MetricSource {
    /// Every column a query against this source touches.
    #[must_use]
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        let mut columns = BTreeSet::from([self.date_column.as_str(), self.value_column.as_str()]);
        columns.extend(self.filters.iter().map(|filter| filter.column.as_str()));
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub source: MetricSource,
    pub unit: String,
    pub allowed_aggregations: BTreeSet<Aggregation>,
    pub default_grain: TimeGrain,
}

impl MetricDefinition {
    #[must_use]
    pub fn allows(&self, aggregation: Aggregation) -> bool {
        self.allowed_aggregations.contains(&aggregation)
    }

    #[must_use]
    pub fn allowed_aggregation_names(&self) -> Vec<&'static str> {
        self.allowed_aggregations
            .iter()
            .map(|aggregation| aggregation.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    metrics: BTreeMap<String, MetricDefinition>,
}

impl MetricCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json_str(BUILTIN_CATALOG_JSON)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            metrics = catalog.len(),
            "metric catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let document = serde_json::from_str::<CatalogDocument>(raw)?;
        build_catalog(document)
    }

    #[must_use]
    pub fn lookup(&self, metric_id: &str) -> Option<&MetricDefinition> {
        self.metrics.get(metric_id)
    }

    #[must_use]
    pub fn metric_ids(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    schema_version: String,

    #[serde(default = "default_table")]
    table: String,

    #[serde(default)]
    columns: ColumnsDocument,

    #[serde(default)]
    defaults: DefaultsDocument,

    metrics: Vec<MetricDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ColumnsDocument {
    date: String,
    value: String,
    #[serde(rename = "type")]
    record_type: String,
    unit: String,
}

impl Default for ColumnsDocument {
    fn default() -> Self {
        Self {
            date: "startDate".to_string(),
            value: "value".to_string(),
            record_type: "type".to_string(),
            unit: "unit".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DefaultsDocument {
    time_grain: TimeGrain,
    cast: ValueCast,
}

impl Default for DefaultsDocument {
    fn default() -> Self {
        Self {
            time_grain: TimeGrain::Day,
            cast: ValueCast::Double,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricDocument {
    id: String,

    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    record_type: Option<String>,

    unit: String,

    #[serde(default)]
    source_unit: Option<String>,

    aggregations: Vec<Aggregation>,

    #[serde(default)]
    default_grain: Option<TimeGrain>,

    #[serde(default)]
    cast: Option<ValueCast>,

    #[serde(default)]
    table: Option<String>,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

struct SharedLayout<'a> {
    table: &'a str,
    columns: &'a ColumnsDocument,
    defaults: &'a DefaultsDocument,
}

fn build_catalog(document: CatalogDocument) -> Result<MetricCatalog, CatalogError> {
    let CatalogDocument {
        schema_version,
        table,
        columns,
        defaults,
        metrics: entries,
    } = document;
    if schema_version != CATALOG_SCHEMA_VERSION {
        return Err(CatalogError::UnsupportedSchemaVersion {
            found: schema_version,
        });
    }
    if entries.is_empty() {
        return Err(CatalogError::Empty);
    }

    let layout = SharedLayout {
        table: &table,
        columns: &columns,
        defaults: &defaults,
    };
    let mut metrics = BTreeMap::new();
    for entry in entries {
        let definition = build_definition(entry, &layout)?;
        if metrics.contains_key(&definition.id) {
            return Err(CatalogError::DuplicateMetric { id: definition.id });
        }
        metrics.insert(definition.id.clone(), definition);
    }

    Ok(MetricCatalog { metrics })
}

fn build_definition(
    entry: MetricDocument,
    layout: &SharedLayout<'_>,
) -> Result<MetricDefinition, CatalogError> {
    let id = entry.id.trim().to_string();
    if id.is_empty() {
        return Err(CatalogError::MissingField {
            metric: "<unnamed>".to_string(),
            field: "id",
        });
    }
    if entry.unit.trim().is_empty() {
        return Err(CatalogError::MissingField {
            metric: id,
            field: "unit",
        });
    }
    if entry.aggregations.is_empty() {
        return Err(CatalogError::EmptyAggregations { metric: id });
    }

    let dedicated_table = entry.table.is_some();
    let table = entry.table.unwrap_or_else(|| layout.table.to_string());
    let columns = layout.columns;
    for (field, value) in [
        ("table", table.as_str()),
        ("columns.date", columns.date.as_str()),
        ("columns.value", columns.value.as_str()),
        ("columns.type", columns.record_type.as_str()),
        ("columns.unit", columns.unit.as_str()),
    ] {
        if !is_sql_identifier(value) {
            return Err(CatalogError::InvalidIdentifier {
                metric: id,
                field,
                value: value.to_string(),
            });
        }
    }

    let mut filters = Vec::new();
    match entry.record_type.filter(|value| !value.trim().is_empty()) {
        Some(record_type) => filters.push(SourceFilter {
            column: columns.record_type.clone(),
            value: record_type,
        }),
        // A shared table needs the type filter to isolate one metric.
        None if !dedicated_table => {
            return Err(CatalogError::MissingField {
                metric: id,
                field: "record_type",
            });
        }
        None => {}
    }
    if let Some(source_unit) = entry.source_unit.filter(|value| !value.trim().is_empty()) {
        filters.push(SourceFilter {
            column: columns.unit.clone(),
            value: source_unit,
        });
    }

    Ok(MetricDefinition {
        description: entry.description,
        source: MetricSource {
            table,
            date_column: columns.date.clone(),
            value_column: columns.value.clone(),
            cast: entry.cast.unwrap_or(layout.defaults.cast),
            filters,
        },
        unit: entry.unit,
        allowed_aggregations: entry.aggregations.into_iter().collect(),
        default_grain: entry.default_grain.unwrap_or(layout.defaults.time_grain),
        id,
    })
}

fn sql_identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|error| {
            panic!("sql identifier regex must compile: {error}");
        })
    })
}

#[must_use]
pub fn is_sql_identifier(value: &str) -> bool {
    sql_identifier_regex().is_match(value)
}

#[cfg(test)]
mod tests {
    use super::{MetricCatalog, is_sql_identifier};
    use crate::models::{Aggregation, TimeGrain};

    #[test]
    fn builtin_catalog_loads_and_resolves_known_metrics() {
        let catalog = MetricCatalog::builtin().expect("builtin catalog should load");
        assert!(catalog.len() >= 10);

        let energy = catalog
            .lookup("active_energy_burned")
            .expect("active_energy_burned should be cataloged");
        assert_eq!(energy.unit, "kcal");
        assert!(energy.allows(Aggregation::Sum));
        assert_eq!(energy.default_grain, TimeGrain::Day);
        assert_eq!(energy.source.table, "healthkit_records");

        let vo2 = catalog.lookup("vo2_max").expect("vo2_max should be cataloged");
        assert_eq!(vo2.default_grain, TimeGrain::Month);
        assert!(!vo2.allows(Aggregation::Sum));
    }

    #[test]
    fn category_metrics_skip_the_unit_filter() {
        let catalog = MetricCatalog::builtin().expect("builtin catalog should load");
        let sleep = catalog
            .lookup("sleep_analysis_events")
            .expect("sleep metric should be cataloged");
        assert_eq!(sleep.source.filters.len(), 1);
        assert_eq!(sleep.source.filters[0].column, "type");
    }

    #[test]
    fn identifier_check_rejects_injection_shapes() {
        assert!(is_sql_identifier("startDate"));
        assert!(is_sql_identifier("_value2"));
        assert!(!is_sql_identifier("value; DROP TABLE x"));
        assert!(!is_sql_identifier("2value"));
        assert!(!is_sql_identifier(""));
    }
}
