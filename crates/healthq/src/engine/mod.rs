//! The request pipeline: validate, compile, execute, format.
//!
//! [`HealthQueryEngine`] is cheap to clone and safe to share across threads;
//! the only shared state is the read-only catalog.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::catalog::MetricCatalog;
use crate::compile::{CompiledQuery, compile};
use crate::config::QueryLimits;
use crate::execute::{DataStore, ExecutionError, execute};
use crate::format::format_result;
use crate::models::{
    FailureClass, HealthQuerySpec, QueryEnvelope, QueryEnvelopeCommandFailure, QueryResult,
    TOOL_NAME,
};
use crate::validate::{ValidatedQuery, ValidationError, parse_spec, validate};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl QueryError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(error) => error.code(),
            Self::Execution(error) => error.code(),
        }
    }

    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Execution(_) => "execution",
        }
    }

    #[must_use]
    pub const fn retryable(&self) -> bool {
        match self {
            Self::Validation(error) => error.retryable(),
            Self::Execution(error) => error.retryable(),
        }
    }

    #[must_use]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::Validation(_) => FailureClass::Validation,
            Self::Execution(_) => FailureClass::Runtime,
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::Validation(error) => error.details(),
            Self::Execution(error) => error.details(),
        }
    }

    #[must_use]
    pub fn to_envelope(&self, command: &str) -> QueryEnvelope {
        QueryEnvelope::error(command, self.code(), self.to_string())
            .with_meta("stage", json!(self.stage()))
            .with_meta("retryable", json!(self.retryable()))
            .with_error_details(self.details())
    }

    #[must_use]
    pub fn into_command_failure(self, command: &str) -> QueryEnvelopeCommandFailure {
        let envelope = self.to_envelope(command);
        match self.failure_class() {
            FailureClass::Validation => QueryEnvelopeCommandFailure::validation(envelope),
            FailureClass::Runtime => QueryEnvelopeCommandFailure::new(envelope),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub compiled: CompiledQuery,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HealthQueryEngine {
    catalog: Arc<MetricCatalog>,
    limits: QueryLimits,
}

impl HealthQueryEngine {
    #[must_use]
    pub fn new(catalog: Arc<MetricCatalog>, limits: QueryLimits) -> Self {
        Self { catalog, limits }
    }

    #[must_use]
    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn validate(&self, spec: &HealthQuerySpec) -> Result<ValidatedQuery<'_>, ValidationError> {
        validate(&self.catalog, &self.limits, spec)
    }

    /// Validates and compiles without touching a store.
    pub fn plan(&self, spec: &HealthQuerySpec) -> Result<CompiledQuery, ValidationError> {
        self.validate(spec).map(|validated| compile(&validated))
    }

    pub fn run(
        &self,
        store: &dyn DataStore,
        spec: &HealthQuerySpec,
    ) -> Result<QueryOutcome, QueryError> {
        self.run_with_timeout(store, spec, self.limits.timeout())
    }

    pub fn run_with_timeout(
        &self,
        store: &dyn DataStore,
        spec: &HealthQuerySpec,
        timeout: Duration,
    ) -> Result<QueryOutcome, QueryError> {
        let _span = tracing::info_span!("healthkit_query", metric = %spec.metric).entered();

        let validated = self.validate(spec).inspect_err(|error| {
            tracing::debug!(code = error.code(), field = error.field(), "spec rejected");
        })?;
        let compiled = compile(&validated);
        tracing::debug!(
            bucket = ?compiled.bucket,
            aggregation = compiled.aggregation.as_str(),
            row_cap = compiled.row_cap,
            "query compiled"
        );

        let execution = execute(store, &compiled, timeout)?;
        let result = format_result(&execution, &validated);
        tracing::info!(
            row_count = result.row_count,
            truncated = result.truncated,
            duration_ms = execution.duration_ms,
            "query answered"
        );

        Ok(QueryOutcome {
            result,
            compiled,
            duration_ms: execution.duration_ms,
        })
    }

    /// Tool-call entry point: raw JSON arguments in, envelope out.
    ///
    /// Failures come back as [`QueryEnvelopeCommandFailure`] carrying the
    /// error envelope; hosts that always want an envelope can use
    /// [`QueryEnvelopeCommandFailure::into_envelope`].
    pub fn handle(
        &self,
        store: &dyn DataStore,
        payload: &Value,
    ) -> Result<QueryEnvelope, QueryEnvelopeCommandFailure> {
        let outcome = parse_spec(payload)
            .map_err(QueryError::from)
            .and_then(|spec| self.run(store, &spec))
            .map_err(|error| error.into_command_failure(TOOL_NAME))?;

        Ok(outcome_envelope(store, &outcome))
    }
}

fn outcome_envelope(store: &dyn DataStore, outcome: &QueryOutcome) -> QueryEnvelope {
    let result = &outcome.result;
    let mut envelope = QueryEnvelope::ok(TOOL_NAME, to_json(result))
        .with_meta("row_count", json!(result.row_count))
        .with_meta("row_cap", json!(outcome.compiled.row_cap))
        .with_meta("truncated", json!(result.truncated))
        .with_meta("duration_ms", json!(outcome.duration_ms))
        .with_meta("compiled", to_json(&outcome.compiled));
    if let Some(query_text) = store.query_text(&outcome.compiled) {
        envelope = envelope.with_meta("query_text", json!(query_text));
    }
    if result.truncated {
        envelope = envelope
            .with_warning(
                "result_truncated",
                format!(
                    "more than {} buckets matched; only the earliest are returned",
                    outcome.compiled.row_cap
                ),
            )
            .with_warning_details(json!({
                "row_cap": outcome.compiled.row_cap,
                "hint": "narrow time_range, use a coarser time_grain, or raise limit",
            }));
    }
    envelope
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
