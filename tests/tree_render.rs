use metagrep::filter::{self, FieldSchema, FieldType};
use metagrep::model::FileMetadata;
use metagrep::render::{self, RenderOptions, TreeContext};
use metagrep::tree::{self, TreeStats};
use std::collections::BTreeMap;

fn schema() -> FieldSchema {
    let mut types = BTreeMap::new();
    types.insert("risk_level".to_string(), FieldType::Str);
    FieldSchema::new(types)
}

fn metadata_for(entries: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, FileMetadata> {
    entries
        .iter()
        .map(|(path, fields)| {
            (
                path.to_string(),
                FileMetadata {
                    chat_id: Some(1),
                    fields: fields
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
            )
        })
        .collect()
}

fn paths(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|p| p.to_string()).collect()
}

#[test]
fn builds_tree_sorted_directories_first() {
    let files = paths(&["src/z.rs", "src/a/mod.rs", "readme.md"]);
    let built = tree::build_tree(&files, "", &[]).unwrap();
    assert_eq!(built.root.name, ".");
    assert!(built.root.is_dir);
    // src/ before readme.md, and inside src the a/ dir before z.rs
    assert_eq!(built.root.children[0].name, "src");
    assert_eq!(built.root.children[1].name, "readme.md");
    let src = &built.root.children[0];
    assert_eq!(src.children[0].name, "a");
    assert!(src.children[0].is_dir);
    assert_eq!(src.children[1].name, "z.rs");
    assert!(!src.children[1].is_dir);
}

#[test]
fn offset_and_focus_restrict_eligible_files() {
    let files = paths(&["src/a.rs", "src/deep/b.rs", "docs/c.md"]);
    let built = tree::build_tree(&files, "src", &[]).unwrap();
    assert_eq!(built.paths, paths(&["src/a.rs", "src/deep/b.rs"]));
    assert_eq!(built.root.children.len(), 2);

    // focus patterns match the original pre-offset path
    let built = tree::build_tree(&files, "", &["src/*.rs".to_string()]).unwrap();
    assert_eq!(built.paths, paths(&["src/a.rs"]));
    let built = tree::build_tree(&files, "", &["src/**".to_string()]).unwrap();
    assert_eq!(built.paths, paths(&["src/a.rs", "src/deep/b.rs"]));
}

#[test]
fn enrich_marks_matches_and_visibility_propagates() {
    let files = paths(&["a/x.go", "a/y.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let metadata = metadata_for(&[
        ("a/x.go", &[("risk_level", "high")]),
        ("a/y.go", &[("risk_level", "low")]),
    ]);
    let conditions =
        filter::parse_filters(&["risk_level=high".to_string()], &schema()).unwrap();
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &conditions);
    tree::calculate_visibility(&mut built.root);

    let a = &built.root.children[0];
    assert!(a.visible);
    assert!(a.children.iter().any(|c| c.name == "x.go" && c.visible));
    assert!(a.children.iter().any(|c| c.name == "y.go" && !c.visible));

    tree::prune_tree(&mut built.root);
    let a = &built.root.children[0];
    assert_eq!(a.children.len(), 1);
    assert_eq!(a.children[0].name, "x.go");
}

#[test]
fn empty_filter_matches_every_file_even_unanalyzed() {
    let files = paths(&["a/x.go", "b/y.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let metadata = metadata_for(&[("a/x.go", &[("risk_level", "high")])]);
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &[]);
    tree::calculate_visibility(&mut built.root);

    let stats = TreeStats::collect(&built.root);
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.analyzed_files, 1);
    assert_eq!(stats.matched_files, 2);
    assert_eq!(stats.coverage_percent, 50.0);
}

#[test]
fn unanalyzed_files_do_not_match_active_filters() {
    let files = paths(&["a/x.go", "b/y.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let metadata = metadata_for(&[("a/x.go", &[("risk_level", "high")])]);
    let conditions =
        filter::parse_filters(&["risk_level=high".to_string()], &schema()).unwrap();
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &conditions);
    tree::calculate_visibility(&mut built.root);
    tree::prune_tree(&mut built.root);

    assert_eq!(built.root.children.len(), 1);
    assert_eq!(built.root.children[0].name, "a");
}

#[test]
fn compact_render_hides_unmatched_file_names() {
    let files = paths(&["a/x.go", "a/y.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let metadata = metadata_for(&[
        ("a/x.go", &[("risk_level", "high")]),
        ("a/y.go", &[("risk_level", "low")]),
    ]);
    let conditions =
        filter::parse_filters(&["risk_level=high".to_string()], &schema()).unwrap();
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &conditions);
    tree::calculate_visibility(&mut built.root);
    let stats = TreeStats::collect(&built.root);

    let fields = vec!["risk_level".to_string()];
    let compact = render::render_ascii(
        &built.root,
        &stats,
        &RenderOptions {
            compact: true,
            fields: &fields,
            value_max_len: 80,
        },
    )
    .unwrap();
    assert!(compact.contains("[✓] x.go"));
    assert!(!compact.contains("y.go"));
    assert!(compact.contains("[○]"));
    assert!(compact.contains("risk_level: high"));
    assert!(compact.contains("2 files, 2 analyzed, 1 matched (100.0% coverage)"));

    let full = render::render_ascii(
        &built.root,
        &stats,
        &RenderOptions {
            compact: false,
            fields: &fields,
            value_max_len: 80,
        },
    )
    .unwrap();
    assert!(full.contains("[○] y.go"));
}

#[test]
fn long_metadata_values_are_truncated_in_ascii_output() {
    let files = paths(&["a/x.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let long_value = "x".repeat(200);
    let metadata = metadata_for(&[("a/x.go", &[("risk_level", long_value.as_str())])]);
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &[]);
    tree::calculate_visibility(&mut built.root);
    let stats = TreeStats::collect(&built.root);

    let fields = vec!["risk_level".to_string()];
    let out = render::render_ascii(
        &built.root,
        &stats,
        &RenderOptions {
            compact: true,
            fields: &fields,
            value_max_len: 16,
        },
    )
    .unwrap();
    assert!(out.contains(&format!("risk_level: {}…", "x".repeat(16))));
    assert!(!out.contains(&long_value));
}

#[test]
fn ai_json_drops_chat_ids_and_visibility() {
    let files = paths(&["a/x.go"]);
    let mut built = tree::build_tree(&files, "", &[]).unwrap();
    let metadata = metadata_for(&[("a/x.go", &[("risk_level", "high")])]);
    tree::enrich_tree(&mut built.root, "", &metadata, &schema(), &[]);
    tree::calculate_visibility(&mut built.root);
    let stats = TreeStats::collect(&built.root);
    let context = TreeContext {
        cwd: ".".to_string(),
        database: "meta.sqlite".to_string(),
        fields: vec![],
        filters: vec![],
        focus: vec![],
        pruned: false,
    };

    let out = render::render_ai_json(&built.root, &stats, &context).unwrap();
    assert!(!out.contains("chat_id"));
    assert!(!out.contains("visible"));
    assert!(out.contains("files_with_metadata"));

    let full = render::render_json(&built.root, &stats, &context).unwrap();
    assert!(full.contains("chat_id"));
    assert!(full.contains("analyzed_files"));
}
