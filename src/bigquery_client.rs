use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::auth::AccessTokenProvider;
use crate::catalog::{
    CatalogClient, ColumnDescriptor, DatasetRef, DryRunOutcome, RemoteTable, TableRef, TableSchema,
};
use crate::error::AssistantError;

pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2/";

const QUERY_TIMEOUT_MS: u64 = 60_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// `CatalogClient` over the BigQuery v2 REST API.
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: Arc<AccessTokenProvider>,
    base_url: Url,
    project_id: String,
    location: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListItem {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    schema: Option<TableSchemaResource>,
    last_modified_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchemaResource {
    #[serde(default)]
    fields: Vec<FieldResource>,
}

#[derive(Debug, Deserialize)]
struct FieldResource {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<FieldResource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    use_query_cache: bool,
    dry_run: bool,
    timeout_ms: u64,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    total_bytes_processed: Option<String>,
    job_complete: Option<bool>,
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl BigQueryClient {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        tokens: Arc<AccessTokenProvider>,
    ) -> Result<Self, AssistantError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http,
            tokens,
            base_url: Url::parse(DEFAULT_BIGQUERY_ENDPOINT)?,
            project_id: project_id.into(),
            location: location.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, AssistantError> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AssistantError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AssistantError::ConfigError {
                message: format!("BigQuery endpoint {} cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, AssistantError> {
        let token = self.tokens.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        read_json(response).await
    }

    async fn post_query(
        &self,
        sql: &str,
        dry_run: bool,
        location: Option<&str>,
    ) -> Result<reqwest::Response, AssistantError> {
        let url = self.endpoint(&["projects", self.project_id.as_str(), "queries"])?;
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            use_query_cache: !dry_run,
            dry_run,
            timeout_ms: QUERY_TIMEOUT_MS,
            request_id: Uuid::new_v4().to_string(),
            location,
        };

        let token = self.tokens.token().await?;
        Ok(self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?)
    }

    async fn run_query(
        &self,
        sql: &str,
        location: Option<&str>,
    ) -> Result<QueryResponse, AssistantError> {
        let response: QueryResponse = read_json(self.post_query(sql, false, location).await?).await?;

        if response.job_complete == Some(false) {
            return Err(AssistantError::ApiError {
                status: 408,
                message: format!("Query did not complete within {} ms", QUERY_TIMEOUT_MS),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CatalogClient for BigQueryClient {
    async fn list_datasets(&self) -> Result<Vec<DatasetRef>, AssistantError> {
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["projects", self.project_id.as_str(), "datasets"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let page: DatasetList = self.get(url).await?;
            datasets.extend(page.datasets.into_iter().map(|d| DatasetRef {
                dataset_id: d.dataset_reference.dataset_id,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(
            "Found {} datasets in project {}",
            datasets.len(),
            self.project_id
        );
        Ok(datasets)
    }

    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<TableRef>, AssistantError> {
        // __TABLES__ carries modification times, which tables.list does not.
        let sql = format!(
            "SELECT table_id, last_modified_time FROM `{}.{}.__TABLES__`",
            self.project_id, dataset_id
        );
        let response = self.run_query(&sql, None).await?;

        response
            .rows
            .iter()
            .map(|row| -> Result<TableRef, AssistantError> {
                let table_id = cell_string(row, 0).ok_or_else(|| AssistantError::ApiError {
                    status: 200,
                    message: format!("__TABLES__ row without table_id in {}", dataset_id),
                })?;
                let last_modified = parse_millis(&cell_string(row, 1).unwrap_or_default())?;
                Ok(TableRef {
                    table_id,
                    last_modified,
                })
            })
            .collect()
    }

    async fn get_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<RemoteTable, AssistantError> {
        let url = self.endpoint(&[
            "projects",
            self.project_id.as_str(),
            "datasets",
            dataset_id,
            "tables",
            table_id,
        ])?;
        let table: TableResource = self.get(url).await?;

        let mut columns = Vec::new();
        if let Some(schema) = &table.schema {
            flatten_fields(&schema.fields, "", &mut columns);
        }
        let last_modified = parse_millis(table.last_modified_time.as_deref().unwrap_or_default())?;

        debug!(
            "Fetched {} columns for {}.{}",
            columns.len(),
            dataset_id,
            table_id
        );
        Ok(RemoteTable {
            columns,
            last_modified,
        })
    }

    async fn dry_run_query(&self, sql: &str) -> Result<DryRunOutcome, AssistantError> {
        let response = self.post_query(sql, true, None).await?;
        let status = response.status();

        if status.is_success() {
            let body: QueryResponse = response.json().await?;
            let bytes_processed = body
                .total_bytes_processed
                .and_then(|b| b.parse::<i64>().ok())
                .unwrap_or(0);
            return Ok(DryRunOutcome::Valid { bytes_processed });
        }

        let message = api_error_message(response).await;
        match status.as_u16() {
            // invalid SQL, unknown tables and unreadable tables are the query's fault
            400 | 403 | 404 => Ok(DryRunOutcome::Rejected { message }),
            code => Err(AssistantError::ApiError {
                status: code,
                message,
            }),
        }
    }

    async fn query_history(&self, sql: &str) -> Result<String, AssistantError> {
        let response = self.run_query(sql, Some(self.location.as_str())).await?;
        Ok(response
            .rows
            .first()
            .and_then(|row| cell_string(row, 0))
            .unwrap_or_default())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AssistantError> {
    let status = response.status();
    if !status.is_success() {
        let message = api_error_message(response).await;
        return Err(AssistantError::ApiError {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json::<T>().await?)
}

async fn api_error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

fn cell_string(row: &QueryRow, index: usize) -> Option<String> {
    match row.f.get(index).map(|cell| &cell.v) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_millis(millis: &str) -> Result<DateTime<Utc>, AssistantError> {
    millis
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| AssistantError::ApiError {
            status: 200,
            message: format!("Invalid modification time '{}'", millis),
        })
}

/// Record fields become dotted column paths after their parent column.
fn flatten_fields(fields: &[FieldResource], prefix: &str, columns: &mut TableSchema) {
    for field in fields {
        let name = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        let mode = field.mode.as_deref().unwrap_or("NULLABLE");
        let data_type = if mode.eq_ignore_ascii_case("REPEATED") {
            format!("ARRAY<{}>", field.field_type)
        } else {
            field.field_type.clone()
        };

        columns.push(ColumnDescriptor::new(
            name.clone(),
            data_type,
            !mode.eq_ignore_ascii_case("REQUIRED"),
        ));
        flatten_fields(&field.fields, &name, columns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_record_fields() {
        let table: TableResource = serde_json::from_value(serde_json::json!({
            "lastModifiedTime": "1735689600000",
            "schema": {"fields": [
                {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "address", "type": "RECORD", "fields": [
                    {"name": "city", "type": "STRING"},
                    {"name": "lines", "type": "STRING", "mode": "REPEATED"}
                ]}
            ]}
        }))
        .unwrap();

        let mut columns = Vec::new();
        flatten_fields(&table.schema.unwrap().fields, "", &mut columns);

        assert_eq!(
            columns,
            vec![
                ColumnDescriptor::new("id", "INTEGER", false),
                ColumnDescriptor::new("address", "RECORD", true),
                ColumnDescriptor::new("address.city", "STRING", true),
                ColumnDescriptor::new("address.lines", "ARRAY<STRING>", true),
            ]
        );
        assert_eq!(
            parse_millis(&table.last_modified_time.unwrap()).unwrap(),
            DateTime::from_timestamp(1_735_689_600, 0).unwrap()
        );
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = BigQueryClient::new("acme", "us-west1", Arc::new(AccessTokenProvider::with_token("t")))
            .unwrap();
        let url = client
            .endpoint(&["projects", "acme", "datasets", "sales data"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/acme/datasets/sales%20data"
        );
    }

    #[test]
    fn test_query_cells_read_strings_and_nulls() {
        let row: QueryRow =
            serde_json::from_value(serde_json::json!({"f": [{"v": "orders"}, {"v": null}]})).unwrap();

        assert_eq!(cell_string(&row, 0).as_deref(), Some("orders"));
        assert_eq!(cell_string(&row, 1), None);
        assert_eq!(cell_string(&row, 2), None);
        assert!(parse_millis("not-a-number").is_err());
    }
}
