use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::AssistantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(into = "String")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    #[default]
    Unknown,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
            JoinType::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse of whatever the model wrote. A bare `JOIN` is an inner join.
    pub fn parse(text: &str) -> Self {
        let upper = text.trim().to_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();

        match tokens.as_slice() {
            ["JOIN"] => JoinType::Inner,
            [first, ..] => match *first {
                "INNER" => JoinType::Inner,
                "LEFT" => JoinType::Left,
                "RIGHT" => JoinType::Right,
                "FULL" => JoinType::Full,
                "CROSS" => JoinType::Cross,
                _ => JoinType::Unknown,
            },
            [] => JoinType::Unknown,
        }
    }
}

impl From<String> for JoinType {
    fn from(value: String) -> Self {
        JoinType::parse(&value)
    }
}

/// `null` and unrecognised labels both read as [`JoinType::Unknown`].
impl<'de> Deserialize<'de> for JoinType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?
            .map(JoinType::from)
            .unwrap_or_default())
    }
}

impl From<JoinType> for String {
    fn from(value: JoinType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One inferred join between two tables. Repeated relationships are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErdRelationship {
    pub from_table: String,
    #[serde(default, deserialize_with = "join_columns")]
    pub from_join_columns: Vec<String>,
    pub to_table: String,
    #[serde(default, deserialize_with = "join_columns")]
    pub to_join_columns: Vec<String>,
    #[serde(default)]
    pub join_type: JoinType,
}

/// Accepts a list, a single (possibly comma separated) name, or `null`.
fn join_columns<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Columns {
        Many(Vec<Option<String>>),
        One(String),
    }

    Ok(match Option::<Columns>::deserialize(deserializer)? {
        Some(Columns::Many(columns)) => columns.into_iter().flatten().collect(),
        Some(Columns::One(columns)) => columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    })
}

/// Outcome of reading the model's ERD reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ErdParse {
    ParseSucceeded(Vec<ErdRelationship>),
    RepairAttempted {
        repaired: String,
        relationships: Vec<ErdRelationship>,
    },
    /// Only produced after a repair pass; `repaired` is the text that was retried.
    ParseFailed { repaired: String, reason: String },
}

impl ErdParse {
    pub fn relationships(&self) -> Option<&[ErdRelationship]> {
        match self {
            ErdParse::ParseSucceeded(relationships)
            | ErdParse::RepairAttempted { relationships, .. } => Some(relationships),
            ErdParse::ParseFailed { .. } => None,
        }
    }

    pub fn repair_attempted(&self) -> bool {
        !matches!(self, ErdParse::ParseSucceeded(_))
    }

    pub fn into_relationships(self) -> Result<Vec<ErdRelationship>, AssistantError> {
        match self {
            ErdParse::ParseSucceeded(relationships)
            | ErdParse::RepairAttempted { relationships, .. } => Ok(relationships),
            ErdParse::ParseFailed { reason, .. } => Err(AssistantError::SnapshotParse {
                path: "model ERD reply".to_string(),
                message: reason,
            }),
        }
    }
}

pub fn parse_erd(text: &str) -> ErdParse {
    if let Ok(relationships) = decode(text.trim()) {
        return ErdParse::ParseSucceeded(relationships);
    }

    let repaired = repair_json(text);
    match decode(&repaired) {
        Ok(relationships) => ErdParse::RepairAttempted {
            repaired,
            relationships,
        },
        Err(reason) => ErdParse::ParseFailed { repaired, reason },
    }
}

/// Entries that do not describe a relationship are dropped; the reply only fails when
/// it is not JSON at all or none of its entries survive.
fn decode(text: &str) -> Result<Vec<ErdRelationship>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(entry) => vec![Value::Object(entry)],
        other => return Err(format!("expected an array of relationships, got {}", other)),
    };

    let total = entries.len();
    let mut relationships = Vec::with_capacity(total);
    let mut last_error = None;
    for entry in entries {
        match serde_json::from_value::<ErdRelationship>(entry) {
            Ok(relationship) => relationships.push(relationship),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if let Some(reason) = last_error {
        if relationships.is_empty() {
            return Err(reason);
        }
        warn!(
            "Dropped {} of {} ERD entries that are not relationships: {}",
            total - relationships.len(),
            total,
            reason
        );
    }

    Ok(relationships)
}

static FENCE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?[ \t]*\n?(.*?)```").unwrap());

/// Best-effort cleanup of JSON written by a model: strips markdown fences and
/// surrounding prose, drops trailing commas, separates back-to-back objects,
/// closes truncated strings and brackets, and wraps a bare object list in an array.
pub fn repair_json(text: &str) -> String {
    let text = text.trim();
    let text = FENCE_REGEX
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let start = match text.find(['{', '[']) {
        Some(start) => start,
        None => return text.trim().to_string(),
    };

    let mut out = String::with_capacity(text.len() + 2);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text[start..].chars() {
        if in_string {
            match c {
                _ if escaped => {
                    escaped = false;
                    out.push(c);
                }
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => {}
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            continue;
        }

        if closers.is_empty() && !out.is_empty() && !matches!(c, '{' | '[' | ',') && !c.is_whitespace() {
            // trailing prose after the last complete value
            break;
        }

        match c {
            '{' | '[' => {
                if matches!(last_significant(&out), Some('}') | Some(']')) {
                    out.push(',');
                }
                closers.push(if c == '{' { '}' } else { ']' });
                out.push(c);
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                if closers.pop().is_none() {
                    break;
                }
                out.push(c);
            }
            '"' => {
                in_string = true;
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }

    let out = out.trim().to_string();
    if out.starts_with('{') {
        format!("[{}]", out)
    } else {
        out
    }
}

fn last_significant(out: &str) -> Option<char> {
    out.chars().rev().find(|c| !c.is_whitespace())
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS_USERS: &str = r#"[{"from_table": "orders", "from_join_columns": ["user_id"], "to_table": "users", "to_join_columns": ["id"], "join_type": "INNER JOIN"}]"#;

    #[test]
    fn test_parse_valid_array_without_repair() {
        let parsed = parse_erd(ORDERS_USERS);

        assert!(!parsed.repair_attempted());
        let relationships = parsed.relationships().unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].from_join_columns, vec!["user_id"]);
        assert_eq!(relationships[0].join_type, JoinType::Inner);
    }

    #[test]
    fn test_fenced_reply_with_trailing_commas_is_repaired() {
        let reply = "Here is the ERD:\n```json\n[\n  {\n    \"from_table\": \"orders\",\n    \"from_join_columns\": [\"user_id\",],\n    \"to_table\": \"users\",\n    \"to_join_columns\": [\"id\"],\n    \"join_type\": \"JOIN\",\n  },\n]\n```\nLet me know if you need more.";

        match parse_erd(reply) {
            ErdParse::RepairAttempted { relationships, .. } => {
                assert_eq!(relationships.len(), 1);
                assert_eq!(relationships[0].to_table, "users");
                assert_eq!(relationships[0].join_type, JoinType::Inner);
            }
            other => panic!("expected repair, got {:?}", other),
        }
    }

    #[test]
    fn test_back_to_back_objects_become_an_array() {
        let reply = r#"{"from_table": "a", "to_table": "b", "join_type": "LEFT JOIN"}
{"from_table": "a", "to_table": "b", "join_type": "LEFT JOIN"}"#;

        let relationships = parse_erd(reply).into_relationships().unwrap();
        assert_eq!(relationships.len(), 2, "duplicates are kept");
        assert_eq!(relationships[0], relationships[1]);
        assert_eq!(relationships[0].join_type, JoinType::Left);
    }

    #[test]
    fn test_truncated_reply_is_closed() {
        let reply = r#"[{"from_table": "a", "from_join_columns": ["x"], "to_table": "b", "to_join_columns": ["y"], "join_type": "FULL OUTER JOIN"},"#;

        let parsed = parse_erd(reply);
        assert!(parsed.repair_attempted());
        let relationships = parsed.relationships().unwrap();
        assert_eq!(relationships[0].join_type, JoinType::Full);
    }

    #[test]
    fn test_unrepairable_reply_reports_failure_after_repair() {
        match parse_erd("I could not find any joins in these queries.") {
            ErdParse::ParseFailed { repaired, .. } => {
                assert_eq!(repaired, "I could not find any joins in these queries.");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_join_type_parsing() {
        assert_eq!(JoinType::parse("JOIN"), JoinType::Inner);
        assert_eq!(JoinType::parse("inner join"), JoinType::Inner);
        assert_eq!(JoinType::parse("LEFT OUTER JOIN"), JoinType::Left);
        assert_eq!(JoinType::parse("CROSS JOIN"), JoinType::Cross);
        assert_eq!(JoinType::parse("lateral"), JoinType::Unknown);
        assert_eq!(JoinType::parse(""), JoinType::Unknown);
        assert_eq!(String::from(JoinType::Right), "RIGHT JOIN");
    }

    #[test]
    fn test_strings_containing_brackets_are_untouched() {
        let reply = r#"[{"from_table": "weird,}name", "to_table": "b[1]", "join_type": "UNKNOWN",}]"#;

        let relationships = parse_erd(reply).into_relationships().unwrap();
        assert_eq!(relationships[0].from_table, "weird,}name");
        assert_eq!(relationships[0].to_table, "b[1]");
    }

    #[test]
    fn test_null_join_type_reads_as_unknown() {
        let reply = r#"[
  {"from_table": "orders", "from_join_columns": ["user_id"], "to_table": "users", "to_join_columns": ["id"], "join_type": "INNER JOIN"},
  {"from_table": "orders", "from_join_columns": ["sku"], "to_table": "products", "to_join_columns": ["sku"], "join_type": null}
]"#;

        match parse_erd(reply) {
            ErdParse::ParseSucceeded(relationships) => {
                assert_eq!(relationships.len(), 2);
                assert_eq!(relationships[0].join_type, JoinType::Inner);
                assert_eq!(relationships[1].join_type, JoinType::Unknown);
                assert_eq!(relationships[1].to_table, "products");
            }
            other => panic!("expected a clean parse, got {:?}", other),
        }
    }

    #[test]
    fn test_loose_join_columns_are_normalised() {
        let reply = r#"[{"from_table": "orders", "from_join_columns": "user_id, region", "to_table": "users", "to_join_columns": null}]"#;

        let relationships = parse_erd(reply).into_relationships().unwrap();
        assert_eq!(relationships[0].from_join_columns, vec!["user_id", "region"]);
        assert!(relationships[0].to_join_columns.is_empty());
        assert_eq!(relationships[0].join_type, JoinType::Unknown);
    }

    #[test]
    fn test_entries_without_tables_are_dropped_individually() {
        let reply = r#"[
  {"note": "the history contains no other joins"},
  {"from_table": "orders", "to_table": "users", "join_type": "LEFT JOIN"}
]"#;

        let relationships = parse_erd(reply).into_relationships().unwrap();
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].join_type, JoinType::Left);

        assert!(matches!(
            parse_erd(r#"[{"note": "nothing"}, 42]"#),
            ErdParse::ParseFailed { .. }
        ));
    }
}
