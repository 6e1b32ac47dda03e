use crate::filter::{self, FieldSchema, FilterCondition};
use crate::model::FileMetadata;
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One node in the metadata tree. Only file nodes carry `chat_id`,
/// `analyzed`, `matched` and `metadata`; a directory's `visible` is the OR
/// of its descendants.
#[derive(Debug, Serialize)]
pub struct Node {
    pub name: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub analyzed: bool,
    pub matched: bool,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

/// Result of tree construction: the root node plus the original repo paths
/// that survived the offset and focus filters, in insertion order. The path
/// list is what the metadata fetch runs against.
#[derive(Debug)]
pub struct BuiltTree {
    pub root: Node,
    pub paths: Vec<String>,
}

#[derive(Default)]
struct PendingNode {
    is_dir: bool,
    children: Vec<(String, PendingNode)>,
    index: HashMap<String, usize>,
}

/// Build a path-segment tree from a flat file list. Files outside
/// `cwd_offset` are rejected; when focus patterns are present, a file must
/// match at least one against its original (pre-offset) path.
pub fn build_tree(files: &[String], cwd_offset: &str, focus: &[String]) -> Result<BuiltTree> {
    let offset = normalize_offset(cwd_offset);
    let focus_set = build_focus_set(focus)?;

    let mut root = PendingNode {
        is_dir: true,
        ..Default::default()
    };
    let mut paths = Vec::new();
    for file in files {
        let Some(rel) = relative_to_offset(file, &offset) else {
            continue;
        };
        if let Some(set) = &focus_set {
            if !set.is_match(file.as_str()) {
                continue;
            }
        }
        insert_path(&mut root, rel);
        paths.push(file.clone());
    }

    Ok(BuiltTree {
        root: finalize(".".to_string(), root),
        paths,
    })
}

fn normalize_offset(cwd: &str) -> String {
    let trimmed = cwd.trim().trim_matches('/');
    if trimmed == "." {
        return String::new();
    }
    trimmed.to_string()
}

// Focus globs keep `*` within one path segment; `**` crosses segments.
fn build_focus_set(focus: &[String]) -> Result<Option<GlobSet>> {
    let patterns: Vec<&String> = focus.iter().filter(|p| !p.trim().is_empty()).collect();
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid focus pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().with_context(|| "build focus set")?))
}

fn relative_to_offset<'a>(path: &'a str, offset: &str) -> Option<&'a str> {
    if offset.is_empty() {
        return Some(path);
    }
    path.strip_prefix(offset)?.strip_prefix('/')
}

fn insert_path(root: &mut PendingNode, rel: &str) {
    let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
    let mut node = root;
    for (idx, segment) in segments.iter().enumerate() {
        let is_last = idx + 1 == segments.len();
        let child_idx = match node.index.get(*segment).copied() {
            Some(i) => i,
            None => {
                node.children
                    .push((segment.to_string(), PendingNode::default()));
                let i = node.children.len() - 1;
                node.index.insert(segment.to_string(), i);
                i
            }
        };
        let current = node;
        let child = &mut current.children[child_idx].1;
        if !is_last {
            child.is_dir = true;
        }
        node = child;
    }
}

// Convert the construction index into the final child ordering:
// directories first, then lexicographic by name, at every level.
fn finalize(name: String, pending: PendingNode) -> Node {
    let mut children: Vec<Node> = pending
        .children
        .into_iter()
        .map(|(child_name, child)| finalize(child_name, child))
        .collect();
    children.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Node {
        name,
        is_dir: pending.is_dir,
        chat_id: None,
        analyzed: false,
        matched: false,
        visible: false,
        metadata: None,
        children,
    }
}

/// Attach fetched metadata to file nodes and evaluate the filter per leaf.
/// A file absent from the fetch result only matches when no conditions were
/// requested at all.
pub fn enrich_tree(
    root: &mut Node,
    cwd_offset: &str,
    metadata: &BTreeMap<String, FileMetadata>,
    schema: &FieldSchema,
    conditions: &[FilterCondition],
) {
    let offset = normalize_offset(cwd_offset);
    enrich_children(&mut root.children, &offset, metadata, schema, conditions);
}

fn enrich_children(
    children: &mut [Node],
    prefix: &str,
    metadata: &BTreeMap<String, FileMetadata>,
    schema: &FieldSchema,
    conditions: &[FilterCondition],
) {
    for node in children {
        let path = if prefix.is_empty() {
            node.name.clone()
        } else {
            format!("{prefix}/{}", node.name)
        };
        if node.is_dir {
            enrich_children(&mut node.children, &path, metadata, schema, conditions);
        } else {
            match metadata.get(&path) {
                Some(meta) => {
                    node.chat_id = meta.chat_id;
                    node.analyzed = true;
                    node.matched = filter::check_filters(&path, &meta.fields, schema, conditions);
                    node.metadata = Some(meta.fields.clone());
                }
                None => {
                    node.matched = conditions.is_empty();
                }
            }
        }
    }
}

/// Post-order visibility: a file is visible when matched, a directory when
/// any descendant is. Every child is evaluated; there is no short-circuit.
pub fn calculate_visibility(node: &mut Node) -> bool {
    if !node.is_dir {
        node.visible = node.matched;
        return node.visible;
    }
    let mut any = false;
    for child in &mut node.children {
        if calculate_visibility(child) {
            any = true;
        }
    }
    node.visible = any;
    any
}

/// Remove invisible subtrees depth-first. A directory survives when it
/// keeps at least one child or is itself matched.
pub fn prune_tree(node: &mut Node) {
    for child in &mut node.children {
        if child.is_dir {
            prune_tree(child);
        }
    }
    node.children.retain(|child| {
        if child.is_dir {
            child.visible && (!child.children.is_empty() || child.matched)
        } else {
            child.visible
        }
    });
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TreeStats {
    pub total_files: usize,
    pub analyzed_files: usize,
    pub matched_files: usize,
    pub coverage_percent: f64,
}

impl TreeStats {
    pub fn collect(root: &Node) -> Self {
        let mut stats = TreeStats {
            total_files: 0,
            analyzed_files: 0,
            matched_files: 0,
            coverage_percent: 0.0,
        };
        stats.walk(root);
        if stats.total_files > 0 {
            let ratio = stats.analyzed_files as f64 / stats.total_files as f64;
            stats.coverage_percent = (ratio * 1000.0).round() / 10.0;
        }
        stats
    }

    fn walk(&mut self, node: &Node) {
        if node.is_dir {
            for child in &node.children {
                self.walk(child);
            }
        } else {
            self.total_files += 1;
            if node.analyzed {
                self.analyzed_files += 1;
            }
            if node.matched {
                self.matched_files += 1;
            }
        }
    }
}
