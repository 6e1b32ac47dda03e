use crate::tree::{Node, TreeStats};
use crate::util;
use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;

/// Invocation context echoed into the JSON outputs.
#[derive(Debug, Serialize)]
pub struct TreeContext {
    pub cwd: String,
    pub database: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub focus: Vec<String>,
    pub pruned: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    /// Hide the names of unmatched files, keeping only glyph and position.
    pub compact: bool,
    /// Metadata fields to print beneath matched files.
    pub fields: &'a [String],
    pub value_max_len: usize,
}

/// ASCII heat-map rendering. Compact mode keeps the tree's shape while
/// hiding the names of files the filter excluded.
pub fn render_ascii(root: &Node, stats: &TreeStats, options: &RenderOptions<'_>) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "{}", root.name)?;
    render_children(&mut out, &root.children, "", options)?;
    writeln!(out)?;
    writeln!(
        out,
        "{} files, {} analyzed, {} matched ({:.1}% coverage)",
        stats.total_files, stats.analyzed_files, stats.matched_files, stats.coverage_percent
    )?;
    Ok(out)
}

fn render_children(
    out: &mut String,
    children: &[Node],
    prefix: &str,
    options: &RenderOptions<'_>,
) -> Result<()> {
    let count = children.len();
    for (idx, node) in children.iter().enumerate() {
        let last = idx + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        if node.is_dir {
            writeln!(out, "{prefix}{connector}{}/", node.name)?;
            render_children(out, &node.children, &child_prefix, options)?;
        } else {
            let glyph = if node.matched { "[✓]" } else { "[○]" };
            if node.matched || !options.compact {
                writeln!(out, "{prefix}{connector}{glyph} {}", node.name)?;
            } else {
                writeln!(out, "{prefix}{connector}{glyph}")?;
            }
            if node.matched {
                if let Some(metadata) = &node.metadata {
                    for field in options.fields {
                        if let Some(value) = metadata.get(field) {
                            writeln!(
                                out,
                                "{child_prefix}  {field}: {}",
                                truncate_value(value, options.value_max_len)
                            )?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn truncate_value(value: &str, max_len: usize) -> String {
    let cut = util::truncate_str_bytes(value, max_len);
    if cut.len() < value.len() {
        format!("{cut}…")
    } else {
        cut
    }
}

/// Full JSON tree with stats and the applied filter/focus context.
pub fn render_json(root: &Node, stats: &TreeStats, context: &TreeContext) -> Result<String> {
    let value = json!({
        "context": context,
        "stats": {
            "total_files": stats.total_files,
            "analyzed_files": stats.analyzed_files,
            "matched_files": stats.matched_files,
            "coverage_percent": stats.coverage_percent,
        },
        "tree": root,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Reduced node shape for the AI-portable output: no chat ids, no
/// visibility flags, minimal token footprint.
#[derive(Debug, Serialize)]
pub struct PortableNode {
    pub name: String,
    pub is_dir: bool,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<std::collections::BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PortableNode>,
}

fn portable(node: &Node) -> PortableNode {
    PortableNode {
        name: node.name.clone(),
        is_dir: node.is_dir,
        matched: node.matched,
        metadata: node.metadata.clone(),
        children: node.children.iter().map(portable).collect(),
    }
}

const PORTABLE_ABOUT: &str =
    "Repository tree annotated with per-file metadata; matched marks files satisfying the active filters";

pub fn render_ai_json(root: &Node, stats: &TreeStats, context: &TreeContext) -> Result<String> {
    let value = json!({
        "context": {
            "about": PORTABLE_ABOUT,
            "cwd": context.cwd,
            "fields": context.fields,
            "pruned": context.pruned,
        },
        "stats": {
            "total_files": stats.total_files,
            "files_with_metadata": stats.analyzed_files,
            "matched_files": stats.matched_files,
            "metadata_coverage_percent": stats.coverage_percent,
        },
        "tree": portable(root),
    });
    Ok(serde_json::to_string_pretty(&value)?)
}
