//! Populates a [`DirectoryTree`] from the real filesystem.
//!
//! Each directory may hold a `.file4you-ignore` file in gitignore syntax. Its
//! rules apply to that directory's own listing only and are not inherited by
//! subdirectories. Configured [`EntryFilter`]s run after the ignore file, on
//! paths relative to the scanned root.

use crate::config::EntryFilter;
use crate::metadata::{Metadata, NodeKind};
use crate::tree::{DirectoryTree, FileNode, NodeId};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{Span, debug, info, info_span, warn};
use walkdir::WalkDir;

pub const IGNORE_FILE_NAME: &str = ".file4you-ignore";

/// Directory names never descended into, whatever the filters say.
const ALWAYS_SKIPPED: &[&str] = &[".git"];

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid root path: {0}")]
    InvalidRoot(String),

    #[error("failed to read directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid ignore file {}: {reason}", path.display())]
    IgnoreFile { path: PathBuf, reason: String },

    #[error("failed to measure directory depth: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Depth of the deepest entry below `root`; direct children have depth 1.
pub fn calculate_max_depth(root: &Path) -> BuildResult<usize> {
    if root.as_os_str().is_empty() {
        return Err(BuildError::InvalidRoot(
            "source directory path cannot be empty".to_string(),
        ));
    }

    let mut max_depth = 0;
    for entry in WalkDir::new(root).min_depth(1) {
        max_depth = max_depth.max(entry?.depth());
    }
    Ok(max_depth)
}

/// Builds directory trees.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    ignore_file_name: String,
    filter: Option<EntryFilter>,
    span: Span,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            ignore_file_name: IGNORE_FILE_NAME.to_string(),
            filter: None,
            span: info_span!("tree_builder"),
        }
    }

    pub fn with_ignore_file_name(mut self, name: impl Into<String>) -> Self {
        self.ignore_file_name = name.into();
        self
    }

    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Builds the tree rooted at `root`, descending no deeper than `max_depth`.
    ///
    /// # Errors
    ///
    /// Fails if the root is not a readable directory, if any directory in the
    /// subtree cannot be listed, or if an ignore file is malformed. An entry
    /// whose own metadata cannot be read is kept with degraded metadata.
    pub fn build(&self, root: &Path, recursive: bool, max_depth: usize) -> BuildResult<DirectoryTree> {
        let _enter = self.span.enter();
        if root.as_os_str().is_empty() {
            return Err(BuildError::InvalidRoot(
                "source directory path cannot be empty".to_string(),
            ));
        }

        let root_meta = fs::metadata(root).map_err(|source| BuildError::ReadDir {
            path: root.to_path_buf(),
            source,
        })?;
        if !root_meta.is_dir() {
            return Err(BuildError::InvalidRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut tree = DirectoryTree::new(root, Metadata::from_fs(&root_meta));
        let tree_root = tree.root();
        self.populate(&mut tree, tree_root, root, recursive, max_depth, 0)?;
        info!(
            root = %root.display(),
            directories = tree.directory_count(),
            files = tree.file_count(),
            "directory tree built"
        );
        Ok(tree)
    }

    /// Builds after measuring the subtree with [`calculate_max_depth`].
    pub fn build_full(&self, root: &Path, recursive: bool) -> BuildResult<DirectoryTree> {
        let max_depth = calculate_max_depth(root)?;
        self.build(root, recursive, max_depth)
    }

    fn populate(
        &self,
        tree: &mut DirectoryTree,
        id: NodeId,
        scan_root: &Path,
        recursive: bool,
        max_depth: usize,
        depth: usize,
    ) -> BuildResult<()> {
        let dir = tree.node(id).path.clone();
        if depth > max_depth {
            warn!(path = %dir.display(), depth, max_depth, "maximum depth exceeded, not descending");
            return Ok(());
        }

        let ignore = self.load_ignore_rules(&dir)?;
        let mut entries = fs::read_dir(&dir)
            .and_then(|iter| iter.collect::<io::Result<Vec<_>>>())
            .map_err(|source| BuildError::ReadDir {
                path: dir.clone(),
                source,
            })?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if is_dir && entry.file_name().to_str().is_some_and(|n| ALWAYS_SKIPPED.contains(&n)) {
                continue;
            }
            if let Some(rules) = &ignore {
                if rules.matched(&path, is_dir).is_ignore() {
                    debug!(path = %path.display(), "ignored by {}", self.ignore_file_name);
                    continue;
                }
            }
            if let Some(filter) = &self.filter {
                let relative = path.strip_prefix(scan_root).unwrap_or(&path);
                if !filter.allows(relative) {
                    debug!(path = %path.display(), "excluded by filter");
                    continue;
                }
            }

            let kind = if is_dir { NodeKind::Directory } else { NodeKind::File };
            let metadata = match entry.metadata() {
                Ok(meta) => Metadata::from_fs(&meta),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read entry info");
                    Metadata::degraded(kind)
                }
            };

            if is_dir {
                let child = tree.add_child_directory(id, path, metadata);
                if recursive {
                    self.populate(tree, child, scan_root, recursive, max_depth, depth + 1)?;
                }
            } else {
                tree.add_file(id, FileNode::new(path, metadata));
            }
        }
        Ok(())
    }

    fn load_ignore_rules(&self, dir: &Path) -> BuildResult<Option<Gitignore>> {
        let ignore_path = dir.join(&self.ignore_file_name);
        if !ignore_path.is_file() {
            return Ok(None);
        }

        let mut builder = GitignoreBuilder::new(dir);
        if let Some(err) = builder.add(&ignore_path) {
            return Err(BuildError::IgnoreFile {
                path: ignore_path,
                reason: err.to_string(),
            });
        }
        let rules = builder.build().map_err(|e| BuildError::IgnoreFile {
            path: ignore_path.clone(),
            reason: e.to_string(),
        })?;
        debug!(path = %ignore_path.display(), rules = rules.num_ignores(), "loaded ignore rules");
        Ok(Some(rules))
    }
}
