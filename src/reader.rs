//! Source tree scanning: walk a directory, apply include/exclude globs,
//! and load matching files as [`Document`]s.
//!
//! The scan is deterministic: results are sorted by relative path, so two
//! builds over the same tree chunk and index in the same order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::SourcesConfig;
use crate::models::{Document, DocumentKind};

pub fn scan_sources(config: &SourcesConfig) -> Result<Vec<Document>> {
    let root = config
        .root
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("sources.root not configured"))?;
    if !root.exists() {
        bail!("Sources root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/bin/**".to_string(),
        "**/obj/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        // Binary or non-UTF-8 files have nothing to chunk.
        let Ok(text) = std::fs::read_to_string(path) else {
            debug!(path = %rel_str, "skipping non-UTF-8 file");
            continue;
        };

        documents.push(Document::new(rel_str, kind_for_path(path), text));
    }

    documents.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(documents)
}

/// Document kind from the file extension. Anything unrecognized is treated
/// as generic text and chunked by paragraphs.
pub fn kind_for_path(path: &Path) -> DocumentKind {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "cs" | "ts" | "tsx" | "js" | "jsx" | "java" | "go" | "rs" | "c" | "cpp" | "h" => {
            DocumentKind::Code
        }
        "sql" => DocumentKind::Sql,
        "csv" => DocumentKind::SpreadsheetSheet,
        _ => DocumentKind::GenericText,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sources_for(root: PathBuf) -> SourcesConfig {
        SourcesConfig {
            root: Some(root),
            include_globs: vec!["**/*.cs".to_string(), "**/*.sql".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("zeta.cs"), "class Z {}").unwrap();
        std::fs::write(dir.path().join("sub/alpha.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not included").unwrap();

        let docs = scan_sources(&sources_for(dir.path().to_path_buf())).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source_id, "sub/alpha.sql");
        assert_eq!(docs[0].kind, DocumentKind::Sql);
        assert_eq!(docs[1].source_id, "zeta.cs");
        assert_eq!(docs[1].kind, DocumentKind::Code);
    }

    #[test]
    fn test_scan_respects_default_excludes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/dep.cs"), "class D {}").unwrap();
        std::fs::write(dir.path().join("app.cs"), "class App {}").unwrap();

        let docs = scan_sources(&sources_for(dir.path().to_path_buf())).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, "app.cs");
    }

    #[test]
    fn test_missing_root_fails() {
        let config = sources_for(PathBuf::from("/nonexistent/sources/root"));
        assert!(scan_sources(&config).is_err());
    }

    #[test]
    fn test_kind_for_path() {
        assert_eq!(kind_for_path(Path::new("a/b.cs")), DocumentKind::Code);
        assert_eq!(kind_for_path(Path::new("schema.SQL")), DocumentKind::Sql);
        assert_eq!(kind_for_path(Path::new("readme.md")), DocumentKind::GenericText);
        assert_eq!(kind_for_path(Path::new("no_extension")), DocumentKind::GenericText);
    }
}
