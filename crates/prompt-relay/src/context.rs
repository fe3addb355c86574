//! Editor context harvesting.
//!
//! The host implements [`ContextHarvester`] to expose what the editor
//! currently shows. [`ContextBundle::harvest`] asks for each field only when
//! the matching feature flag is on; the relay never computes context itself.

use crate::config::FeatureFlags;
use crate::{ActiveFile, ContextBundle, Selection};
use std::path::Path;
use tracing::{debug, warn};

/// Source of editor context. Every accessor may return `None`.
pub trait ContextHarvester: Send + Sync {
    fn workspace_root(&self) -> Option<String> {
        None
    }

    fn active_file(&self) -> Option<ActiveFile> {
        None
    }

    fn selection(&self) -> Option<Selection> {
        None
    }

    fn open_files(&self) -> Option<Vec<String>> {
        None
    }
}

/// A harvester with nothing to offer.
pub struct NoContext;
impl ContextHarvester for NoContext {}

/// A harvester backed by fixed values, for CLIs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    pub workspace_root: Option<String>,
    pub active_file: Option<ActiveFile>,
    pub selection: Option<Selection>,
    pub open_files: Option<Vec<String>>,
}

impl StaticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace_root(mut self, root: impl Into<String>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_active_file(mut self, file: ActiveFile) -> Self {
        self.active_file = Some(file);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_open_files(mut self, files: Vec<String>) -> Self {
        self.open_files = Some(files);
        self
    }

    /// Read `path` from disk as the active file. Unreadable files are
    /// skipped with a warning.
    pub fn with_active_file_from_disk(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                self.active_file = Some(ActiveFile {
                    path: path.display().to_string(),
                    language: language_for_path(path).to_string(),
                    content,
                });
            }
            Err(e) => warn!("Skipping active file {}: {e}", path.display()),
        }
        self
    }
}

impl ContextHarvester for StaticContext {
    fn workspace_root(&self) -> Option<String> {
        self.workspace_root.clone()
    }

    fn active_file(&self) -> Option<ActiveFile> {
        self.active_file.clone()
    }

    fn selection(&self) -> Option<Selection> {
        self.selection.clone()
    }

    fn open_files(&self) -> Option<Vec<String>> {
        self.open_files.clone()
    }
}

impl ContextBundle {
    /// Collect the fields enabled in `flags` from `harvester`.
    pub fn harvest(harvester: &dyn ContextHarvester, flags: &FeatureFlags) -> Self {
        let bundle = Self {
            workspace_root: flags
                .include_workspace
                .then(|| harvester.workspace_root())
                .flatten(),
            active_file: flags
                .include_active_file
                .then(|| harvester.active_file())
                .flatten(),
            selection: flags
                .include_selection
                .then(|| harvester.selection())
                .flatten(),
            open_files: flags
                .include_open_files
                .then(|| harvester.open_files())
                .flatten(),
        };
        debug!(
            "Harvested context: workspace={}, active_file={}, selection={}, open_files={}",
            bundle.workspace_root.is_some(),
            bundle.active_file.is_some(),
            bundle.selection.is_some(),
            bundle.open_files.as_ref().map_or(0, |f| f.len()),
        );
        bundle
    }
}

/// Editor language id guessed from the file extension.
pub fn language_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "md" => "markdown",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sh" | "bash" => "shellscript",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;
    use std::path::PathBuf;

    fn full_context() -> StaticContext {
        StaticContext::new()
            .with_workspace_root("/ws")
            .with_active_file(ActiveFile {
                path: "/ws/src/lib.rs".into(),
                language: "rust".into(),
                content: "pub fn f() {}".into(),
            })
            .with_selection(Selection {
                start: Position::default(),
                end: Position { line: 0, character: 5 },
                text: "pub f".into(),
            })
            .with_open_files(vec!["/ws/src/lib.rs".into(), "/ws/Cargo.toml".into()])
    }

    #[test]
    fn harvest_respects_flags() {
        let flags = FeatureFlags {
            include_workspace: true,
            include_active_file: false,
            include_selection: true,
            include_open_files: false,
            ..Default::default()
        };
        let bundle = ContextBundle::harvest(&full_context(), &flags);
        assert_eq!(bundle.workspace_root.as_deref(), Some("/ws"));
        assert!(bundle.active_file.is_none());
        assert!(bundle.selection.is_some());
        assert!(bundle.open_files.is_none());
    }

    #[test]
    fn harvest_from_empty_source_is_empty() {
        let flags = FeatureFlags {
            include_open_files: true,
            ..Default::default()
        };
        assert!(ContextBundle::harvest(&NoContext, &flags).is_empty());
    }

    #[test]
    fn active_file_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, "print('hi')").unwrap();

        let ctx = StaticContext::new().with_active_file_from_disk(&path);
        let file = ctx.active_file.unwrap();
        assert_eq!(file.language, "python");
        assert_eq!(file.content, "print('hi')");
    }

    #[test]
    fn unreadable_active_file_is_skipped() {
        let ctx = StaticContext::new().with_active_file_from_disk("/nonexistent/file.rs");
        assert!(ctx.active_file.is_none());
    }

    #[test]
    fn language_guess() {
        assert_eq!(language_for_path(&PathBuf::from("a/b.RS")), "rust");
        assert_eq!(language_for_path(&PathBuf::from("x.tsx")), "typescriptreact");
        assert_eq!(language_for_path(&PathBuf::from("Makefile")), "plaintext");
    }
}
