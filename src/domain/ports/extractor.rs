//! Dependency extraction port.
//!
//! Isolates the import-scanning heuristic so a syntax-tree-based
//! resolver can replace it without touching the selection algorithm.

/// Extracts import-like path expressions from one source file's text.
pub trait DependencyExtractor: Send + Sync {
    /// Raw module specifiers found in `contents`, in source order.
    /// Relative specifiers (`./`, `../`) are resolved by the caller.
    fn extract_imports(&self, contents: &str) -> Vec<String>;
}
