use crate::util;
use anyhow::Result;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub no_ignore: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self { no_ignore }
    }
}

/// Walk the repository and return the tracked file paths, normalized
/// relative to the root and sorted for deterministic output.
pub fn list_files(repo_root: &Path, options: ScanOptions) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut builder = WalkBuilder::new(repo_root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    let walker = builder
        .hidden(false)
        .filter_entry(|entry| !is_ignored_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                eprintln!("metagrep: walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        match util::normalize_rel_path(repo_root, entry.path()) {
            Ok(rel_path) => files.push(rel_path),
            Err(_) => continue,
        }
    }
    files.sort();
    Ok(files)
}

fn is_ignored_entry(entry: &ignore::DirEntry) -> bool {
    match entry.file_name() {
        name if name == OsStr::new(".metagrep") => true,
        name if name == OsStr::new(".git") => true,
        _ => false,
    }
}
