use crate::filter;
use crate::model::{FileSummary, MatchLine, MatchResult, SearchSummary};
use std::collections::BTreeMap;

/// Values longer than this, or containing a newline, are assumed
/// non-categorical and excluded from the field distribution.
pub const MAX_CATEGORICAL_LEN: usize = 50;

/// Group enriched matches by file, count matches per file, and build the
/// field-value histogram. Files sort by descending match count (path order
/// breaks ties); `limit` of 0 means unlimited.
pub fn aggregate_matches(
    matches: &[MatchResult],
    display_fields: &[String],
    limit: usize,
) -> SearchSummary {
    let mut by_file: BTreeMap<String, FileSummary> = BTreeMap::new();
    let mut distribution: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for m in matches {
        let entry = by_file.entry(m.path.clone()).or_insert_with(|| {
            let metadata = m.metadata.as_ref();
            let fields = metadata
                .map(|meta| project_fields(&meta.fields, display_fields))
                .unwrap_or_default();
            FileSummary {
                path: m.path.clone(),
                analyzed: metadata.map(|meta| !meta.fields.is_empty()).unwrap_or(false),
                chat_id: metadata.and_then(|meta| meta.chat_id),
                match_count: 0,
                fields,
                matches: Vec::new(),
            }
        });
        entry.match_count += 1;
        entry.matches.push(MatchLine {
            line: m.line,
            column: m.column,
            text: m.line_text.clone(),
        });

        if let Some(meta) = &m.metadata {
            for (field, value) in &meta.fields {
                record_distribution(&mut distribution, field, value);
            }
        }
    }

    let total_matches = matches.len();
    let mut files: Vec<FileSummary> = by_file.into_values().collect();
    files.sort_by(|a, b| {
        b.match_count
            .cmp(&a.match_count)
            .then_with(|| a.path.cmp(&b.path))
    });

    let is_truncated = limit > 0 && files.len() > limit;
    if is_truncated {
        files.truncate(limit);
    }

    SearchSummary {
        total_matches,
        files,
        field_distribution: distribution,
        is_truncated,
    }
}

fn project_fields(
    fields: &BTreeMap<String, String>,
    display_fields: &[String],
) -> BTreeMap<String, String> {
    if display_fields.is_empty() {
        return fields.clone();
    }
    fields
        .iter()
        .filter(|(field, _)| display_fields.iter().any(|d| d == *field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

fn record_distribution(
    distribution: &mut BTreeMap<String, BTreeMap<String, usize>>,
    field: &str,
    value: &str,
) {
    // List values contribute per element so the histogram stays categorical.
    match filter::parse_json_list(value) {
        Some(items) => {
            for item in items {
                record_categorical(distribution, field, &item);
            }
        }
        None => record_categorical(distribution, field, value),
    }
}

fn record_categorical(
    distribution: &mut BTreeMap<String, BTreeMap<String, usize>>,
    field: &str,
    value: &str,
) {
    if value.len() > MAX_CATEGORICAL_LEN || value.contains('\n') {
        return;
    }
    *distribution
        .entry(field.to_string())
        .or_default()
        .entry(value.to_string())
        .or_default() += 1;
}
