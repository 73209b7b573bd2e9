//! Prompt templates for ERD inference and SQL drafting.
//!
//! Every function here is a pure function of its arguments: identical inputs give
//! byte-identical prompts.

use std::fmt;
use std::str::FromStr;

use crate::catalog::SchemaMap;
use crate::erd::ErdRelationship;
use crate::error::AssistantError;

pub const BASE_SYSTEM_INSTRUCTION: &str = "You are a SQL expert.";

pub const SQL_MISSION: &str = "Your mission is to generate valid BigQuery SQL that is based on the given schemas and ERD that fulfills the user request.";

pub const ERD_MISSION: &str = "Your mission is to identify and describe relationships between tables and datasets in BigQuery using the given context and instructions.";

pub const INNER_JOIN_RULE: &str = "Queries that only specify JOIN should be treated as INNER JOIN.";

/// Days of job history fed into ERD inference, excluding the most recent day.
pub const HISTORY_LOOKBACK_DAYS: u32 = 60;

const ERD_TASK: &str = "Task: Analyze these queries and describe the relationships between the tables.
Define which tables are joined together and how they are joined, even when there are multiple joins within a single query.";

const ERD_EXAMPLE: &str = r#"{
  "from_table": "orders",
  "from_join_columns": ["user_id"],
  "to_table": "users",
  "to_join_columns": ["id"],
  "join_type": "INNER JOIN"
}"#;

const SCHEMA_DESCRIPTION: &str = "Table schemas are provided as a JSON object. Each key is a dataset name and each value is an object with one entry per table in the dataset.
The key of each table entry is the table name and the value is a list of objects representing the columns in the table.
Each column object defines a single column with its name, data type and nullability.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErdPurpose {
    Json,
    Summary,
}

impl ErdPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErdPurpose::Json => "json",
            ErdPurpose::Summary => "summary",
        }
    }
}

impl fmt::Display for ErdPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErdPurpose {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ErdPurpose::Json),
            "summary" => Ok(ErdPurpose::Summary),
            other => Err(AssistantError::ConfigError {
                message: format!("Unknown ERD purpose: {}", other),
            }),
        }
    }
}

pub fn sql_system_instructions() -> String {
    format!("{} {}", BASE_SYSTEM_INSTRUCTION, SQL_MISSION)
}

pub fn erd_system_instructions() -> String {
    format!("{} {}", BASE_SYSTEM_INSTRUCTION, ERD_MISSION)
}

/// Aggregates the project's recent successful JOIN queries into a single string cell.
pub fn query_history_sql(location: &str) -> String {
    format!(
        "SELECT
    STRING_AGG(query) AS query
FROM
    `region-{location}`.INFORMATION_SCHEMA.JOBS
WHERE
    creation_time BETWEEN TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {days} DAY) AND TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL 1 DAY)
    AND query LIKE \"%JOIN%\"
    AND state = \"DONE\"
    AND error_result.reason IS NULL",
        location = location.to_lowercase(),
        days = HISTORY_LOOKBACK_DAYS,
    )
}

pub fn erd_template(project_queries: &str, purpose: ErdPurpose) -> String {
    match purpose {
        ErdPurpose::Json => format!(
            "{task}

Context:
- Resolve all table aliases to their actual table names. If the same table has multiple aliases within a query, create separate relationships for each alias.
- Resolve aliases within subqueries relative to their scope.
- Identify and process both explicit and implicit joins.
- Infer the specific JOIN type (INNER JOIN, LEFT JOIN, RIGHT JOIN, FULL JOIN, CROSS JOIN) or label it as UNKNOWN if it cannot be determined. {inner_rule}
- Handle self-joins, multiple join conditions, and the USING clause. Ignore any UNNEST conditions.
- Format the output as a strict JSON array. Each element describes one relationship and has this structure:

```json
{example}
```

Return only the JSON array, without commentary.

The SQL queries are concatenated together. You will find all of the code you need here:
```
{queries}
```

Answer:
",
            task = ERD_TASK,
            inner_rule = INNER_JOIN_RULE,
            example = ERD_EXAMPLE,
            queries = project_queries,
        ),
        ErdPurpose::Summary => format!(
            "{task}

Context:
- Replace any table aliases in the queries with their actual table names, resolving aliases within subqueries relative to their scope.
- If a query involves multiple tables, output all the pairwise relationships.
- Name the JOIN type of each relationship. {inner_rule} Use UNKNOWN if it cannot be determined.
- Do not define the JOIN for UNNEST conditions.
- Format the answer as a human-readable markdown description.
- The SQL queries are concatenated together. You will find all of the code you need here:
```
{queries}
```

Answer:
",
            task = ERD_TASK,
            inner_rule = INNER_JOIN_RULE,
            queries = project_queries,
        ),
    }
}

fn render_schema(schema: &SchemaMap) -> String {
    serde_json::to_string_pretty(schema).unwrap_or_else(|_| "{}".to_string())
}

fn render_erd(erd: &[ErdRelationship]) -> String {
    serde_json::to_string_pretty(erd).unwrap_or_else(|_| "[]".to_string())
}

/// The column constraint is a request to the model; nothing checks the reply against `schema`.
pub fn query_generation_template(task: &str, schema: &SchemaMap, erd: &[ErdRelationship]) -> String {
    format!(
        "Task:
Generate a BigQuery SQL query to fulfill the following task:
{task}

Context:
{schema_description}
It is critical that your query only uses columns that are defined in these schemas. No other columns should be used. Treat the schemas as the definitive source of information about the database structure.

Carefully analyze the task and follow these steps:

1. **Identify Tables:** Determine which tables are needed to fulfill the request.
2. **Select Columns:** Using the schemas, identify the necessary columns and their data types.
3. **Construct Query:** Write the SQL query, ensuring correct join conditions, filter criteria, and data type handling.

Table Schemas:
{schema}

ERD Summary:
{erd}

Your response should be the SQL query and an explanation of why each column and join relationship was chosen.
",
        task = task,
        schema_description = SCHEMA_DESCRIPTION,
        schema = render_schema(schema),
        erd = render_erd(erd),
    )
}

pub fn query_check_template(
    query: &str,
    schema: &SchemaMap,
    erd: &[ErdRelationship],
    project_id: &str,
    dataset_list: &[String],
    prior_error: Option<&str>,
) -> String {
    let datasets = serde_json::to_string(dataset_list).unwrap_or_else(|_| "[]".to_string());

    let error_section = match prior_error {
        Some(error) => format!(
            "The query dry run returned this exception. Be sure your revised query will resolve this error:
{}

",
            error
        ),
        None => String::new(),
    };

    format!(
        "Task: Review and revise a SQL query to ensure it strictly adheres to a given database schema.
Here is the SQL query generated by another AI:

```sql
{query}
```

{schema_description}
{schema}

The entity relationship diagram for the datasets is a JSON array.
Each object defines a join relationship. A single join relationship may be repeated throughout the array.
Here is an example of the structure of each object:
```json
{example}
```
{erd}

{error_section}Carefully analyze the query and the schema.
If the query uses any columns that are NOT present in the schema, or if it uses incorrect table names, revise the query to use the correct column and table names.

Additionally, ensure that all table names in the query are fully qualified with the project ID '{project_id}' and a dataset_id.
The dataset_id must be one of the following values: {datasets}.
If a table reference is missing the project_id or dataset_id, update the table reference to include both.
For example:
- A table referenced as `products` in the original query must be referenced as `{project_id}.dataset_id.products`.
- A table referenced as `{project_id}.users` must be referenced as `{project_id}.dataset_id.users`.
",
        query = query,
        schema_description = SCHEMA_DESCRIPTION,
        schema = render_schema(schema),
        example = ERD_EXAMPLE,
        erd = render_erd(erd),
        error_section = error_section,
        project_id = project_id,
        datasets = datasets,
    )
}
