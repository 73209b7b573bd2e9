use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, DryRunOutcome};
use crate::config::AssistantConfig;
use crate::domain::{ErdReport, QueryResult};
use crate::erd::{self, ErdParse, ErdRelationship};
use crate::error::AssistantError;
use crate::llm::GenerativeModel;
use crate::prompt::{self, ErdPurpose};
use crate::schema_loader::SchemaLoader;
use crate::storage;

static SQL_FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:sql|googlesql)?[ \t]*\n(.*?)```").unwrap());

/// Drives the model through ERD inference and the draft → validate → revise cycle.
pub struct QueryPipeline {
    config: AssistantConfig,
    catalog: Arc<dyn CatalogClient>,
    model: Arc<dyn GenerativeModel>,
    loader: SchemaLoader,
}

impl QueryPipeline {
    pub fn new(
        config: AssistantConfig,
        catalog: Arc<dyn CatalogClient>,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        let loader = SchemaLoader::new(config.schema_root.clone());
        Self {
            config,
            catalog,
            model,
            loader,
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Reads the relationship file written by the last successful ERD run.
    pub fn load_erd(&self) -> Result<Vec<ErdRelationship>, AssistantError> {
        storage::read_required_json(&self.config.erd_json_path())
    }

    /// Infers the ERD from recent query history and overwrites both ERD files.
    ///
    /// An unparseable JSON reply leaves the previous relationship file in place.
    pub async fn generate_erd(&self) -> Result<ErdReport, AssistantError> {
        let history_sql = prompt::query_history_sql(&self.config.location);
        let project_queries = self.catalog.query_history(&history_sql).await?;
        if project_queries.trim().is_empty() {
            warn!("Query history contains no JOIN queries; the ERD will be empty");
        }

        let system_instructions = prompt::erd_system_instructions();

        let json_reply = self
            .model
            .generate(
                &self.config.erd_model_id,
                &system_instructions,
                &prompt::erd_template(&project_queries, ErdPurpose::Json),
            )
            .await?;

        let parse = erd::parse_erd(&json_reply);
        let json_path = match &parse {
            ErdParse::ParseSucceeded(relationships)
            | ErdParse::RepairAttempted { relationships, .. } => {
                let path = self.config.erd_json_path();
                storage::write_json(&path, relationships)?;
                info!(
                    "ERD json file written with {} relationships{}",
                    relationships.len(),
                    if parse.repair_attempted() { " (repaired)" } else { "" }
                );
                Some(path)
            }
            ErdParse::ParseFailed { reason, .. } => {
                warn!(
                    "ERD reply is not valid JSON even after repair, keeping {}: {}",
                    self.config.erd_json_path().display(),
                    reason
                );
                None
            }
        };

        let summary = self
            .model
            .generate(
                &self.config.erd_model_id,
                &system_instructions,
                &prompt::erd_template(&project_queries, ErdPurpose::Summary),
            )
            .await?;

        let summary_path = self.config.erd_summary_path();
        storage::write_atomic(&summary_path, summary.as_bytes())?;
        info!("ERD summary file written");

        Ok(ErdReport {
            parse,
            json_path,
            summary_path,
            summary,
        })
    }

    /// Drafts a query for `request`, optionally dry-runs it, and always asks for a revision.
    pub async fn generate_sql(
        &self,
        request: &str,
        project_id: &str,
    ) -> Result<QueryResult, AssistantError> {
        let schema_map = self.loader.load_snapshot()?;
        let erd = self.load_erd()?;
        let dataset_list: Vec<String> = schema_map.keys().cloned().collect();
        let system_instructions = prompt::sql_system_instructions();

        info!("Drafting SQL for request: {}", request);
        let draft = self
            .model
            .generate(
                &self.config.sql_model_id,
                &system_instructions,
                &prompt::query_generation_template(request, &schema_map, &erd),
            )
            .await?;
        debug!("First query: {}", draft);

        let dry_run = if self.config.dry_run_validate {
            let outcome = self.catalog.dry_run_query(extract_sql(&draft)).await?;
            match &outcome {
                DryRunOutcome::Valid { bytes_processed } => {
                    info!("This query will process {} bytes.", bytes_processed)
                }
                DryRunOutcome::Rejected { message } => {
                    info!("Dry run rejected the draft: {}", message)
                }
            }
            Some(outcome)
        } else {
            None
        };

        let check_prompt = prompt::query_check_template(
            &draft,
            &schema_map,
            &erd,
            project_id,
            &dataset_list,
            dry_run.as_ref().and_then(|outcome| outcome.rejection()),
        );
        let revised = self
            .model
            .generate(&self.config.sql_model_id, &system_instructions, &check_prompt)
            .await?;
        debug!("Second query: {}", revised);

        Ok(QueryResult {
            draft_query: draft.clone(),
            explanation: draft,
            revised_query: revised,
            dry_run,
        })
    }
}

/// The SQL inside the first fenced block of a reply, or the whole reply when unfenced.
fn extract_sql(reply: &str) -> &str {
    SQL_FENCE_REGEX
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| reply.trim())
}
