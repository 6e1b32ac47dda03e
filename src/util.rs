use anyhow::{Context, Result};
use std::path::{Component, Path};

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(repo_root).with_context(|| {
        format!(
            "strip prefix {} from {}",
            repo_root.display(),
            path.display()
        )
    })?;
    Ok(normalize_path(rel))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

pub fn truncate_str_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes.min(value.len());
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Translate a `*`-wildcard path pattern into a SQL LIKE pattern.
pub fn glob_to_like(pattern: &str) -> String {
    pattern.replace('*', "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalize_path_joins_with_forward_slashes() {
        let path = PathBuf::from("src").join("db").join("mod.rs");
        assert_eq!(normalize_path(&path), "src/db/mod.rs");
        assert_eq!(normalize_path(Path::new("")), ".");
    }

    #[test]
    fn glob_to_like_substitutes_wildcards() {
        assert_eq!(glob_to_like("src/*"), "src/%");
        assert_eq!(glob_to_like("**/*.rs"), "%%/%.rs");
        assert_eq!(glob_to_like("docs"), "docs");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str_bytes("hello", 10), "hello");
        assert_eq!(truncate_str_bytes("hello", 3), "hel");
        // multi-byte char straddling the cut
        assert_eq!(truncate_str_bytes("héllo", 2), "h");
    }
}
