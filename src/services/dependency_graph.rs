//! Test↔source dependency graph indexer.
//!
//! Enumerates test files under the configured roots, statically
//! extracts import path expressions, resolves them against a fixed
//! extension/index search order, and adds directory-proximity
//! heuristics for imports the static scan misses. The result is a
//! persisted bidirectional map; rebuilding on an unchanged corpus
//! yields identical edges.

use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};

use crate::domain::errors::PipelineResult;
use crate::domain::models::{DependencyMapping, SelectionConfig};
use crate::domain::ports::DependencyExtractor;

/// Index-file names tried when an import resolves to a directory.
const INDEX_FILES: [&str; 4] = ["index.ts", "index.tsx", "index.js", "index.jsx"];

/// Regex-based extractor. A heuristic, not a parser; the trait seam
/// lets a syntax-tree resolver replace it later.
pub struct RegexImportExtractor {
    import_re: Regex,
    require_re: Regex,
}

impl RegexImportExtractor {
    pub fn new() -> Self {
        Self {
            // `import x from '...'`, `import '...'`, `export ... from '...'`
            import_re: Regex::new(r#"(?m)^\s*(?:import|export)\b[^'"]*?['"]([^'"]+)['"]"#)
                .expect("static regex"),
            // `require('...')` and dynamic `import('...')`
            require_re: Regex::new(r#"(?:require|import)\(\s*['"]([^'"]+)['"]\s*\)"#)
                .expect("static regex"),
        }
    }
}

impl Default for RegexImportExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyExtractor for RegexImportExtractor {
    fn extract_imports(&self, contents: &str) -> Vec<String> {
        let mut specifiers = Vec::new();
        for caps in self.import_re.captures_iter(contents) {
            specifiers.push(caps[1].to_string());
        }
        for caps in self.require_re.captures_iter(contents) {
            let spec = caps[1].to_string();
            if !specifiers.contains(&spec) {
                specifiers.push(spec);
            }
        }
        specifiers
    }
}

/// Builds and refreshes the dependency mapping.
pub struct DependencyGraphIndexer {
    config: SelectionConfig,
    project_root: PathBuf,
    extractor: Box<dyn DependencyExtractor>,
}

impl DependencyGraphIndexer {
    pub fn new(config: SelectionConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            extractor: Box::new(RegexImportExtractor::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn DependencyExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Whether `path` (relative, forward slashes) looks like a test file.
    pub fn is_test_file(&self, path: &str) -> bool {
        self.config.test_suffixes.iter().any(|s| path.ends_with(s))
    }

    /// Enumerate test files under the configured roots, as paths
    /// relative to the project root with forward slashes. Sorted for
    /// deterministic rebuilds.
    pub fn enumerate_test_files(&self) -> PipelineResult<Vec<String>> {
        let mut found = Vec::new();
        for root in &self.config.test_roots {
            let dir = self.project_root.join(root);
            if dir.is_dir() {
                self.walk(&dir, &mut found)?;
            }
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    fn walk(&self, dir: &Path, found: &mut Vec<String>) -> PipelineResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                if name != "node_modules" && name != ".git" {
                    self.walk(&path, found)?;
                }
            } else if let Some(rel) = self.relative(&path) {
                if self.is_test_file(&rel) {
                    found.push(rel);
                }
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.project_root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// Build the full bidirectional mapping.
    pub fn build(&self) -> PipelineResult<DependencyMapping> {
        let test_files = self.enumerate_test_files()?;
        let mut mapping = DependencyMapping::new(Utc::now());

        for test in &test_files {
            let abs = self.project_root.join(test);
            let contents = std::fs::read_to_string(&abs).unwrap_or_default();

            for spec in self.extractor.extract_imports(&contents) {
                if let Some(source) = self.resolve_import(test, &spec) {
                    mapping.add_edge(test, &source);
                }
            }

            for source in self.heuristic_sources(test) {
                mapping.add_edge(test, &source);
            }
        }

        info!(
            tests = test_files.len(),
            edges = mapping.edge_count(),
            "Dependency mapping built"
        );
        Ok(mapping)
    }

    /// Resolve a relative import specifier against the fixed
    /// extension/index search order. Bare specifiers (packages) are
    /// ignored; they are not project sources.
    fn resolve_import(&self, test: &str, spec: &str) -> Option<String> {
        if !spec.starts_with("./") && !spec.starts_with("../") {
            return None;
        }

        let test_dir = Path::new(test).parent()?;
        let joined = normalize(&test_dir.join(spec));

        // Exact path first, then extension candidates, then index files.
        let candidates = std::iter::once(joined.clone())
            .chain(
                self.config
                    .source_extensions
                    .iter()
                    .map(|ext| format!("{joined}{ext}")),
            )
            .chain(INDEX_FILES.iter().map(|idx| format!("{joined}/{idx}")));

        for candidate in candidates {
            let abs = self.project_root.join(&candidate);
            if abs.is_file() {
                debug!(test = test, import = spec, resolved = %candidate, "Import resolved");
                return Some(candidate);
            }
        }
        None
    }

    /// Directory-proximity fallback: same-directory files sharing the
    /// test's base name, plus siblings of the parent directory when
    /// the test sits inside a `__tests__` directory.
    fn heuristic_sources(&self, test: &str) -> Vec<String> {
        let mut sources = Vec::new();
        let path = Path::new(test);
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return sources;
        };
        let Some(base) = self
            .config
            .test_suffixes
            .iter()
            .find_map(|s| file_name.strip_suffix(s.as_str()))
        else {
            return sources;
        };

        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(dir) = path.parent() {
            dirs.push(dir.to_path_buf());
            if dir.file_name().is_some_and(|n| n == "__tests__") {
                if let Some(parent) = dir.parent() {
                    dirs.push(parent.to_path_buf());
                }
            }
        }

        for dir in dirs {
            for ext in &self.config.source_extensions {
                let candidate = normalize(&dir.join(format!("{base}{ext}")));
                if candidate != test && self.project_root.join(&candidate).is_file() {
                    sources.push(candidate);
                }
            }
        }
        sources
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> String {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                parts.pop();
            }
            std::path::Component::CurDir => {}
            other => parts.push(other.as_os_str()),
        }
    }
    parts
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_static_imports() {
        let extractor = RegexImportExtractor::new();
        let source = r#"
import React from 'react';
import { DepthWidget } from './DepthWidget';
import '../styles/theme.css';
export { helper } from './helpers';
const lazy = require('./lazyModule');
const dyn = import('./dynModule');
"#;
        let imports = extractor.extract_imports(source);
        assert!(imports.contains(&"react".to_string()));
        assert!(imports.contains(&"./DepthWidget".to_string()));
        assert!(imports.contains(&"../styles/theme.css".to_string()));
        assert!(imports.contains(&"./helpers".to_string()));
        assert!(imports.contains(&"./lazyModule".to_string()));
        assert!(imports.contains(&"./dynModule".to_string()));
    }

    #[test]
    fn test_normalize_collapses_parents() {
        assert_eq!(
            normalize(Path::new("src/widgets/../services/api")),
            "src/services/api"
        );
        assert_eq!(normalize(Path::new("src/./widgets/gauge")), "src/widgets/gauge");
    }

    #[test]
    fn test_is_test_file() {
        let indexer = DependencyGraphIndexer::new(SelectionConfig::default(), "/tmp");
        assert!(indexer.is_test_file("src/DepthWidget.test.tsx"));
        assert!(indexer.is_test_file("src/api.spec.ts"));
        assert!(!indexer.is_test_file("src/DepthWidget.tsx"));
    }
}
