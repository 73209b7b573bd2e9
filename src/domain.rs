use serde::Serialize;
use std::path::PathBuf;

use crate::catalog::DryRunOutcome;
use crate::erd::ErdParse;

/// Output of one draft → revise cycle.
///
/// The model answers the drafting prompt with the query and its rationale in a single
/// reply, so `draft_query` and `explanation` both carry that reply verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub draft_query: String,
    pub explanation: String,
    pub revised_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<DryRunOutcome>,
}

#[derive(Debug, Clone)]
pub struct ErdReport {
    pub parse: ErdParse,
    /// Set only when the relationship file was overwritten.
    pub json_path: Option<PathBuf>,
    pub summary_path: PathBuf,
    pub summary: String,
}
