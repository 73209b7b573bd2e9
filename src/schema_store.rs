use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, RefreshWatermark, TableRef};
use crate::error::AssistantError;
use crate::storage;

/// Kept outside the `<table>.json` namespace.
pub const WATERMARK_FILE: &str = "last_updated.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub datasets: usize,
    pub written: usize,
    pub unchanged: usize,
    /// `dataset.table` names whose schema could not be fetched this run.
    pub failed: Vec<String>,
}

/// Local mirror of the remote catalog: `<schema_root>/<dataset>/<table>.json`.
pub struct SchemaStore {
    schema_root: PathBuf,
    catalog: Arc<dyn CatalogClient>,
}

impl SchemaStore {
    pub fn new(schema_root: impl Into<PathBuf>, catalog: Arc<dyn CatalogClient>) -> Self {
        Self {
            schema_root: schema_root.into(),
            catalog,
        }
    }

    pub fn schema_root(&self) -> &Path {
        &self.schema_root
    }

    pub fn table_path(&self, dataset_id: &str, table_id: &str) -> PathBuf {
        self.schema_root
            .join(dataset_id)
            .join(format!("{}.json", table_id))
    }

    pub fn watermark_path(&self, dataset_id: &str) -> PathBuf {
        self.schema_root.join(dataset_id).join(WATERMARK_FILE)
    }

    pub fn watermark(&self, dataset_id: &str) -> Result<Option<RefreshWatermark>, AssistantError> {
        let path = self.watermark_path(dataset_id);
        match storage::read_to_string_if_exists(&path)? {
            Some(text) => text
                .parse::<RefreshWatermark>()
                .map(Some)
                .map_err(|e| AssistantError::SnapshotParse {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub async fn refresh(&self) -> Result<RefreshReport, AssistantError> {
        self.refresh_at(Utc::now()).await
    }

    /// Refreshes every dataset, stamping successful datasets with `started_at`.
    pub async fn refresh_at(&self, started_at: DateTime<Utc>) -> Result<RefreshReport, AssistantError> {
        fs::create_dir_all(&self.schema_root)?;

        let datasets = self
            .catalog
            .list_datasets()
            .await
            .map_err(|e| enumeration_error("Failed to list datasets", e))?;

        let mut report = RefreshReport::default();
        if datasets.is_empty() {
            info!("Catalog does not contain any datasets");
        }

        for dataset in datasets {
            self.refresh_dataset(&dataset.dataset_id, started_at, &mut report)
                .await?;
            report.datasets += 1;
        }

        info!(
            "Schema refresh complete: {} written, {} unchanged, {} failed",
            report.written,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    async fn refresh_dataset(
        &self,
        dataset_id: &str,
        started_at: DateTime<Utc>,
        report: &mut RefreshReport,
    ) -> Result<(), AssistantError> {
        let dataset_dir = self.schema_root.join(dataset_id);
        if !dataset_dir.exists() {
            fs::create_dir_all(&dataset_dir)?;
            info!("{} created", dataset_dir.display());
        }

        let watermark = match self.watermark(dataset_id) {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!("Ignoring unreadable watermark for {}: {}", dataset_id, e);
                None
            }
        };

        let tables = self
            .catalog
            .list_tables(dataset_id)
            .await
            .map_err(|e| enumeration_error(&format!("Failed to list tables of {}", dataset_id), e))?;

        if tables.is_empty() {
            info!("Dataset {} does not contain any tables", dataset_id);
        }

        let mut failures = 0;
        for table in &tables {
            match self.refresh_table(dataset_id, table, watermark).await {
                Ok(true) => report.written += 1,
                Ok(false) => report.unchanged += 1,
                Err(AssistantError::TableFetch { message, .. }) => {
                    warn!(
                        "Keeping cached schema for {}.{}: {}",
                        dataset_id, table.table_id, message
                    );
                    failures += 1;
                    report
                        .failed
                        .push(format!("{}.{}", dataset_id, table.table_id));
                }
                Err(e) => return Err(e),
            }
        }

        if failures == 0 {
            let watermark = format!("{}\n", RefreshWatermark(started_at));
            storage::write_atomic(&self.watermark_path(dataset_id), watermark.as_bytes())?;
        } else {
            // an advanced watermark would hide the failed tables from the next refresh
            warn!(
                "Watermark for {} left unchanged after {} failed table(s)",
                dataset_id, failures
            );
        }

        Ok(())
    }

    /// Returns whether the table file was (re)written.
    async fn refresh_table(
        &self,
        dataset_id: &str,
        table: &TableRef,
        watermark: Option<RefreshWatermark>,
    ) -> Result<bool, AssistantError> {
        let path = self.table_path(dataset_id, &table.table_id);

        let fresh = watermark.is_some_and(|w| w.trusts(table.last_modified));
        if fresh && path.exists() {
            info!(
                "{} not changed since last local schema refresh",
                table.table_id
            );
            return Ok(false);
        }

        let remote = self
            .catalog
            .get_table(dataset_id, &table.table_id)
            .await
            .map_err(|e| AssistantError::TableFetch {
                dataset: dataset_id.to_string(),
                table: table.table_id.clone(),
                message: e.to_string(),
            })?;

        storage::write_json(&path, &remote.columns)?;
        info!("{} schema written to {}", table.table_id, path.display());

        Ok(true)
    }
}

fn enumeration_error(context: &str, err: AssistantError) -> AssistantError {
    match err {
        AssistantError::CatalogEnumeration { .. } => err,
        other => AssistantError::CatalogEnumeration {
            message: format!("{}: {}", context, other),
        },
    }
}
