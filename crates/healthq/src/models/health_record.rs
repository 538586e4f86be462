use serde::{Deserialize, Serialize};

/// One row of the converted export, as the ingestion step writes it.
///
/// `start_date` is an ISO-8601 instant (`2021-03-04T12:15:00Z`,
/// `2021-03-04 12:15:00`, or with a `+HH:MM` offset). `value` keeps the
/// export's textual form; metrics cast it when they aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    #[serde(rename = "type")]
    pub record_type: String,

    #[serde(rename = "sourceName", skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(rename = "startDate")]
    pub start_date: String,

    #[serde(rename = "endDate", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl HealthRecord {
    #[must_use]
    pub fn quantity(
        record_type: impl Into<String>,
        unit: impl Into<String>,
        start_date: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            source_name: None,
            unit: Some(unit.into()),
            start_date: start_date.into(),
            end_date: None,
            value: Some(value.to_string()),
        }
    }

    #[must_use]
    pub fn category(
        record_type: impl Into<String>,
        start_date: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            source_name: None,
            unit: None,
            start_date: start_date.into(),
            end_date: None,
            value: Some(value.into()),
        }
    }
}
