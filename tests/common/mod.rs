#![allow(dead_code)]

use async_trait::async_trait;
use bq_sql_assistant::catalog::{
    CatalogClient, ColumnDescriptor, DatasetRef, DryRunOutcome, RemoteTable, TableRef,
};
use bq_sql_assistant::llm::GenerativeModel;
use bq_sql_assistant::AssistantError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn orders_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id", "INT64", false),
        ColumnDescriptor::new("user_id", "INT64", true),
    ]
}

#[derive(Clone)]
pub struct StubTable {
    pub columns: Vec<ColumnDescriptor>,
    pub last_modified: DateTime<Utc>,
}

/// In-memory catalog. Tables listed in `forbidden` fail when their columns are fetched.
#[derive(Default)]
pub struct StubCatalog {
    pub datasets: Mutex<BTreeMap<String, BTreeMap<String, StubTable>>>,
    pub forbidden: Mutex<HashSet<String>>,
    pub fail_listing: bool,
    /// Dataset whose table listing fails.
    pub fail_table_listing: Option<String>,
    pub fetched: Mutex<Vec<String>>,
    pub dry_run_outcome: Option<DryRunOutcome>,
    pub dry_runs: Mutex<Vec<String>>,
    pub history: String,
}

impl StubCatalog {
    pub fn with_table(self, dataset: &str, table: &str, stub: StubTable) -> Self {
        self.datasets
            .lock()
            .unwrap()
            .entry(dataset.to_string())
            .or_default()
            .insert(table.to_string(), stub);
        self
    }

    pub fn forbid(&self, dataset: &str, table: &str) {
        self.forbidden
            .lock()
            .unwrap()
            .insert(format!("{}.{}", dataset, table));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogClient for StubCatalog {
    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, AssistantError> {
        if self.fail_listing {
            return Err(AssistantError::ApiError {
                status: 403,
                message: "bigquery.datasets.list denied".to_string(),
            });
        }
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .keys()
            .map(|id| DatasetRef {
                dataset_id: id.clone(),
            })
            .collect())
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableRef>, AssistantError> {
        if self.fail_table_listing.as_deref() == Some(dataset_id) {
            return Err(AssistantError::ApiError {
                status: 400,
                message: format!("Cannot read __TABLES__ of {}", dataset_id),
            });
        }
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .get(dataset_id)
            .map(|tables| {
                tables
                    .iter()
                    .map(|(id, stub)| TableRef {
                        table_id: id.clone(),
                        last_modified: stub.last_modified,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<RemoteTable, AssistantError> {
        let key = format!("{}.{}", dataset_id, table_id);
        self.fetched.lock().unwrap().push(key.clone());

        if self.forbidden.lock().unwrap().contains(&key) {
            return Err(AssistantError::ApiError {
                status: 500,
                message: format!("{} must not be fetched", key),
            });
        }

        let datasets = self.datasets.lock().unwrap();
        let stub = datasets
            .get(dataset_id)
            .and_then(|tables| tables.get(table_id))
            .ok_or_else(|| AssistantError::ApiError {
                status: 404,
                message: format!("Not found: Table {}", key),
            })?;

        Ok(RemoteTable {
            columns: stub.columns.clone(),
            last_modified: stub.last_modified,
        })
    }

    async fn dry_run_query(&self, sql: &str) -> Result<DryRunOutcome, AssistantError> {
        self.dry_runs.lock().unwrap().push(sql.to_string());
        Ok(self
            .dry_run_outcome
            .clone()
            .unwrap_or(DryRunOutcome::Valid { bytes_processed: 0 }))
    }

    async fn query_history(&self, _sql: &str) -> Result<String, AssistantError> {
        Ok(self.history.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model_id: String,
    pub system_instructions: String,
    pub prompt: String,
}

/// Replays canned replies in order and records every prompt it was given.
#[derive(Default)]
pub struct StubModel {
    replies: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl StubModel {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeModel for StubModel {
    async fn generate(
        &self,
        model_id: &str,
        system_instructions: &str,
        prompt: &str,
    ) -> Result<String, AssistantError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model_id: model_id.to_string(),
            system_instructions: system_instructions.to_string(),
            prompt: prompt.to_string(),
        });

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AssistantError::ModelInvocation {
                message: "quota exceeded".to_string(),
            })
    }
}
