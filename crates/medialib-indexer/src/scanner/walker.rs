//! Directory walker with a static ignore policy.

use crate::IndexerError;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default ignore patterns: hidden files, editor backups, OS metadata.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[".*", "~*", "Thumbs.db", "desktop.ini"];

/// Single-threaded file system walker.
///
/// Hidden entries are always skipped. Each ignore pattern is a glob matched
/// against names at any depth; matching directories are not descended into.
/// Symlinks are not followed and are never yielded.
#[derive(Clone)]
pub struct Walker {
    root: PathBuf,
    overrides: Override,
}

impl Walker {
    /// Create a walker for `root` with the given ignore patterns.
    pub fn new<S: AsRef<str>>(root: &Path, ignore_patterns: &[S]) -> Result<Self, IndexerError> {
        let mut builder = OverrideBuilder::new(root);
        for pattern in ignore_patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add(&format!("!{pattern}"))
                .map_err(|e| IndexerError::Pattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
        }
        let overrides = builder.build()?;

        Ok(Self {
            root: root.to_path_buf(),
            overrides,
        })
    }

    /// Visit every regular file. `visit` returns `false` to stop early.
    ///
    /// Returns the number of files visited.
    pub fn for_each_file<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(PathBuf) -> bool,
    {
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(true)
            .follow_links(false)
            .overrides(self.overrides.clone())
            .build();

        let mut visited = 0;
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    // Unreadable subdirectories are skipped, not fatal
                    debug!(error = %e, "Walk error");
                    continue;
                }
            };
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            visited += 1;
            if !visit(entry.into_path()) {
                break;
            }
        }
        visited
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a walk would skip `path`: it lies outside the root, or it or
    /// one of its parent directories is hidden or matches an ignore pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        let components: Vec<_> = relative.components().collect();
        let mut current = self.root.clone();
        for (i, component) in components.iter().enumerate() {
            let name = component.as_os_str();
            if name.to_string_lossy().starts_with('.') {
                return true;
            }
            current.push(name);
            let is_dir = i + 1 < components.len();
            if self.overrides.matched(&current, is_dir).is_ignore() {
                return true;
            }
        }
        false
    }

    /// Collect every file path, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        self.for_each_file(|path| {
            files.push(path);
            true
        });
        files.sort();
        files
    }
}
