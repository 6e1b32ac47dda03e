use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata fetched for one file. A field value is either a plain scalar or
/// a JSON-array literal stored as a string. A file counts as analyzed when a
/// chat session produced metadata for it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub fields: BTreeMap<String, String>,
}

/// One ripgrep match before enrichment.
#[derive(Debug, Clone)]
pub struct RawMatch {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub line_text: String,
}

/// A match enriched with its file's metadata.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub line_text: String,
    pub metadata: Option<FileMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchLine {
    pub line: usize,
    pub column: usize,
    pub text: String,
}

/// Per-file aggregation of enriched matches.
#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub path: String,
    pub analyzed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub match_count: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    pub matches: Vec<MatchLine>,
}

/// Aggregated search output: files sorted by descending match count, plus a
/// categorical histogram of field values seen across analyzed matches.
#[derive(Debug, Serialize)]
pub struct SearchSummary {
    pub total_matches: usize,
    pub files: Vec<FileSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_distribution: BTreeMap<String, BTreeMap<String, usize>>,
    pub is_truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchReport {
    pub query: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    pub total_matches: usize,
    pub files: Vec<FileSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub field_distribution: BTreeMap<String, BTreeMap<String, usize>>,
    pub is_truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_fields: Vec<String>,
}

/// Field registry entry reported by the `fields` command.
#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub field: String,
    pub kind: String,
}

/// One metadata record accepted by the `import` command.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub path: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}
