use crate::aggregate;
use crate::config::Config;
use crate::db::{AnalyzedFilter, CancelFlag, Db};
use crate::filter;
use crate::model::{MatchResult, RawMatch, SearchReport};
use crate::util;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions<'a> {
    pub filters: &'a [String],
    pub fields: &'a [String],
    pub analyzed: AnalyzedFilter,
    pub path_globs: &'a [String],
    pub limit: usize,
    pub no_ignore: bool,
}

/// Run ripgrep, enrich matches with metadata, drop files that fail the
/// filter conditions, and aggregate the survivors per file.
pub fn run_search(
    repo_root: &Path,
    db: &Db,
    query: &str,
    options: &SearchOptions<'_>,
    cancel: &CancelFlag,
) -> Result<SearchReport> {
    let schema = db.field_schema()?;
    let conditions = filter::parse_filters(options.filters, &schema)?;
    let raw_matches = match run_ripgrep(repo_root, query, options.no_ignore) {
        Ok(results) => results,
        Err(_) => scan_fallback(repo_root, query, options.no_ignore)?,
    };

    let paths: Vec<String> = raw_matches
        .iter()
        .map(|m| m.path.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut projected: Vec<String> = options.fields.to_vec();
    for field in filter::referenced_fields(&conditions) {
        if !projected.contains(&field) {
            projected.push(field);
        }
    }

    let (metadata, available_fields) = db.fetch_metadata(
        &paths,
        options.analyzed,
        options.path_globs,
        &projected,
        cancel,
    )?;
    let client_globs = build_path_glob_set(options.path_globs)?;

    let mut results: Vec<MatchResult> = Vec::new();
    for m in raw_matches {
        let keep = match metadata.get(&m.path) {
            Some(meta) => filter::check_filters(&m.path, &meta.fields, &schema, &conditions),
            // Absent from the map means either excluded by a system filter
            // or never analyzed; the latter only passes an empty filter.
            None => {
                conditions.is_empty()
                    && absent_allowed(&m.path, options.analyzed, client_globs.as_ref())
            }
        };
        if !keep {
            continue;
        }
        let file_metadata = metadata.get(&m.path).cloned();
        results.push(MatchResult {
            path: m.path,
            line: m.line,
            column: m.column,
            line_text: m.line_text,
            metadata: file_metadata,
        });
    }

    let summary = aggregate::aggregate_matches(&results, options.fields, options.limit);
    Ok(SearchReport {
        query: query.to_string(),
        filters: options.filters.to_vec(),
        total_matches: summary.total_matches,
        files: summary.files,
        field_distribution: summary.field_distribution,
        is_truncated: summary.is_truncated,
        available_fields,
    })
}

// The fetch query only sees analyzed rows, so the analyzed/glob system
// filters must be re-applied client-side to files with no metadata.
fn absent_allowed(path: &str, analyzed: AnalyzedFilter, globs: Option<&GlobSet>) -> bool {
    if analyzed == AnalyzedFilter::Analyzed {
        return false;
    }
    match globs {
        Some(set) => set.is_match(path),
        None => true,
    }
}

// Mirrors the SQL LIKE translation: `*` crosses path separators.
fn build_path_glob_set(path_globs: &[String]) -> Result<Option<GlobSet>> {
    if path_globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in path_globs {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid path glob: {pattern}"))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().with_context(|| "build path glob set")?))
}

/// Run `rg --json` over the repository and parse the match stream.
pub fn run_ripgrep(repo_root: &Path, query: &str, no_ignore: bool) -> Result<Vec<RawMatch>> {
    let build_cmd = |allow_no_require_git: bool, allow_timeout: bool| {
        let mut cmd = Command::new("rg");
        cmd.arg("--json").arg("-n").arg("--column");
        // Prevent ReDoS and resource exhaustion
        if allow_timeout {
            let timeout = format!("{}s", Config::get().search_timeout_secs);
            cmd.arg("--timeout").arg(&timeout);
        }
        cmd.arg("--regex-size-limit").arg("10M");
        cmd.arg("--dfa-size-limit").arg("10M");
        if no_ignore {
            cmd.arg("--no-ignore");
        } else if allow_no_require_git {
            cmd.arg("--no-require-git");
        }
        cmd
    };

    let mut output = build_cmd(true, true)
        .arg(query)
        .arg(repo_root)
        .output()
        .with_context(|| "run rg")?;

    if !output.status.success() && !no_ignore && rg_flag_unsupported(&output, "--no-require-git") {
        output = build_cmd(false, true)
            .arg(query)
            .arg(repo_root)
            .output()
            .with_context(|| "run rg")?;
    }
    // Retry without --timeout if rg doesn't support it
    if !output.status.success() && rg_flag_unsupported(&output, "--timeout") {
        output = build_cmd(!no_ignore, false)
            .arg(query)
            .arg(repo_root)
            .output()
            .with_context(|| "run rg")?;
    }
    let exit_code = output.status.code().unwrap_or(2);
    if exit_code == 1 {
        // Exit code 1 = no matches found. Return empty.
        return Ok(Vec::new());
    }
    if exit_code != 0 {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("exceeded") || stderr.contains("timeout") {
            eprintln!(
                "metagrep: search timeout after {}s",
                Config::get().search_timeout_secs
            );
        }
        anyhow::bail!("rg failed (exit code {}): {}", exit_code, stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut matches = Vec::new();
    for line in stdout.lines() {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if value.get("type").and_then(|t| t.as_str()) != Some("match") {
            continue;
        }
        let data = &value["data"];
        let raw_path = data["path"]["text"].as_str().unwrap_or("");
        let path = match Path::new(raw_path).strip_prefix(repo_root) {
            Ok(rel) => util::normalize_path(rel),
            Err(_) => raw_path.to_string(),
        };
        let line_number = data["line_number"].as_u64().unwrap_or(0) as usize;
        let line_text = data["lines"]["text"]
            .as_str()
            .unwrap_or("")
            .trim_end()
            .to_string();
        let column = data["submatches"]
            .get(0)
            .and_then(|v| v["start"].as_u64())
            .map(|v| v as usize + 1)
            .unwrap_or(1);
        matches.push(RawMatch {
            path,
            line: line_number,
            column,
            line_text,
        });
    }
    Ok(matches)
}

fn rg_flag_unsupported(output: &std::process::Output, flag: &str) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains(flag)
}

// Literal-substring scan used when rg is unavailable.
fn scan_fallback(repo_root: &Path, query: &str, no_ignore: bool) -> Result<Vec<RawMatch>> {
    let mut matches = Vec::new();
    let files = crate::scan::list_files(repo_root, crate::scan::ScanOptions::new(no_ignore))?;
    for rel_path in files {
        let content = match std::fs::read_to_string(repo_root.join(&rel_path)) {
            Ok(value) => value,
            Err(_) => continue,
        };
        for (idx, line) in content.lines().enumerate() {
            if let Some(pos) = line.find(query) {
                matches.push(RawMatch {
                    path: rel_path.clone(),
                    line: idx + 1,
                    column: pos + 1,
                    line_text: line.trim_end().to_string(),
                });
            }
        }
    }
    Ok(matches)
}
