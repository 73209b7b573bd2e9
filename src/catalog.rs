use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AssistantError;

/// A single column as cached in `<schema_root>/<dataset>/<table>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

pub type TableSchema = Vec<ColumnDescriptor>;

/// Table name to columns.
pub type DatasetSchema = BTreeMap<String, TableSchema>;

/// Dataset name to tables. Ordered so that prompts embedding it are reproducible.
pub type SchemaMap = BTreeMap<String, DatasetSchema>;

/// Time of the last successful local refresh of one dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RefreshWatermark(pub DateTime<Utc>);

impl RefreshWatermark {
    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.0
    }

    /// A cached table is trusted unless the remote copy changed strictly after the watermark.
    pub fn trusts(&self, remote_last_modified: DateTime<Utc>) -> bool {
        remote_last_modified <= self.0
    }
}

/// Stored as a single RFC 3339 line.
impl fmt::Display for RefreshWatermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl FromStr for RefreshWatermark {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s.trim()).map(|t| RefreshWatermark(t.with_timezone(&Utc)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub dataset_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table_id: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTable {
    pub columns: TableSchema,
    pub last_modified: DateTime<Utc>,
}

/// Result of submitting a query for validation only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DryRunOutcome {
    Valid { bytes_processed: i64 },
    Rejected { message: String },
}

impl DryRunOutcome {
    pub fn rejection(&self) -> Option<&str> {
        match self {
            DryRunOutcome::Valid { .. } => None,
            DryRunOutcome::Rejected { message } => Some(message),
        }
    }
}

/// Remote data-warehouse metadata and validation service, scoped to one project.
///
/// `dry_run_query` returns `Ok(DryRunOutcome::Rejected)` when the warehouse refuses the
/// query, and `Err` only when the call itself could not complete.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, AssistantError>;

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableRef>, AssistantError>;

    async fn get_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<RemoteTable, AssistantError>;

    async fn dry_run_query(&self, sql: &str) -> Result<DryRunOutcome, AssistantError>;

    /// Runs a query expected to return a single string cell and returns that cell.
    async fn query_history(&self, sql: &str) -> Result<String, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_watermark_trusts_equal_and_older() {
        let mark = RefreshWatermark(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());

        assert!(mark.trusts(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        assert!(mark.trusts(Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap()));
        assert!(!mark.trusts(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 1).unwrap()));
    }

    #[test]
    fn test_column_descriptor_uses_type_key() {
        let column = ColumnDescriptor::new("id", "INT64", false);
        let json = serde_json::to_value(&column).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"name": "id", "type": "INT64", "nullable": false})
        );
    }

    #[test]
    fn test_watermark_text_form() {
        let mark = RefreshWatermark(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());

        assert_eq!(mark.to_string(), "2025-03-01T12:00:00Z");
        assert_eq!("2025-03-01T12:00:00Z\n".parse::<RefreshWatermark>().unwrap(), mark);
        assert_eq!(
            "2025-03-01T14:00:00+02:00".parse::<RefreshWatermark>().unwrap(),
            mark
        );
        assert!("[{\"name\": \"id\"}]".parse::<RefreshWatermark>().is_err());
    }
}
