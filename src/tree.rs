//! In-memory model of a real directory subtree.
//!
//! [`DirectoryTree`] is an arena: every [`DirectoryNode`] lives in one vector
//! and is addressed by a [`NodeId`]. Child edges own nothing beyond their index;
//! the parent index on each node is only used to reconstruct paths and depths.
//! Files are leaves stored inline on their directory.
//!
//! The tree is populated once by the builder, read concurrently by the
//! organizer, and then torn down with [`DirectoryTree::cleanup`].

use crate::cancel::CancellationToken;
use crate::metadata::{Metadata, MetadataError, NodeKind};
use crate::spatial::{MetadataPoint, SpatialIndex};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{Span, debug, info, info_span, warn};

/// Errors produced by tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree walk cancelled")]
    Cancelled,

    #[error("spatial index has not been built")]
    IndexNotBuilt,

    #[error("invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("failed to (de)serialize tree: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Index of a directory node inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A regular file inside a directory node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: PathBuf,
    pub name: String,
    /// Lowercase extension with its leading dot, or empty.
    pub extension: String,
    pub metadata: Metadata,
}

impl FileNode {
    pub fn new(path: PathBuf, metadata: Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = extension_of(&path);
        Self {
            path,
            name,
            extension,
            metadata,
        }
    }
}

/// Lowercase `.ext` for a path, or an empty string when it has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub path: PathBuf,
    pub metadata: Metadata,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    files: Vec<FileNode>,
}

impl DirectoryNode {
    fn new(path: PathBuf, metadata: Metadata, parent: Option<NodeId>) -> Self {
        Self {
            path,
            metadata,
            parent,
            children: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn files(&self) -> &[FileNode] {
        &self.files
    }

    /// Last path segment, or the whole path for a root like `/`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Aggregate statistics refreshed by [`DirectoryTree::walk`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeMetrics {
    pub total_nodes: u64,
    pub total_size: u64,
    pub max_depth: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub processing_time: Duration,
    pub operation_counts: HashMap<String, u64>,
}

/// Serialized form of a directory and everything beneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub path: PathBuf,
    pub metadata: Metadata,
    #[serde(default)]
    pub children: Vec<NodeSnapshot>,
    #[serde(default)]
    pub files: Vec<FileNode>,
}

#[derive(Debug)]
pub struct DirectoryTree {
    nodes: Vec<DirectoryNode>,
    root: NodeId,
    metrics: Mutex<TreeMetrics>,
    spatial: Option<SpatialIndex<NodeId>>,
    span: Span,
}

impl DirectoryTree {
    /// Creates a tree holding only its root directory.
    pub fn new(root_path: impl Into<PathBuf>, metadata: Metadata) -> Self {
        let root_path = root_path.into();
        let span = info_span!("directory_tree", root = %root_path.display());
        Self {
            nodes: vec![DirectoryNode::new(root_path, metadata, None)],
            root: NodeId(0),
            metrics: Mutex::new(TreeMetrics::default()),
            spatial: None,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.nodes[self.root.0].path
    }

    pub fn node(&self, id: NodeId) -> &DirectoryNode {
        &self.nodes[id.0]
    }

    /// Number of directory nodes, root included.
    pub fn directory_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of files across the whole tree.
    pub fn file_count(&self) -> usize {
        self.nodes.iter().map(|n| n.files.len()).sum()
    }

    pub fn set_metadata(&mut self, id: NodeId, metadata: Metadata) {
        self.nodes[id.0].metadata = metadata;
    }

    /// Adds a child directory under `parent`.
    ///
    /// Sibling names are unique: if `parent` already has a child with the same
    /// last path segment, that child is returned and `metadata` is discarded.
    pub fn add_child_directory(&mut self, parent: NodeId, path: PathBuf, metadata: Metadata) -> NodeId {
        if let Some(existing) = self.child_named(parent, path.file_name().map(|n| n.to_string_lossy()).as_deref()) {
            return existing;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(DirectoryNode::new(path, metadata, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    fn child_named(&self, parent: NodeId, name: Option<&str>) -> Option<NodeId> {
        let name = name?;
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[child.0].name() == name)
    }

    pub fn add_file(&mut self, dir: NodeId, file: FileNode) {
        self.nodes[dir.0].files.push(file);
    }

    /// Walks `segments` below the root, creating any missing directories.
    ///
    /// Calling it twice with the same segments returns the same node and
    /// creates nothing the second time.
    pub fn find_or_create_path<S: AsRef<str>>(&mut self, segments: &[S]) -> NodeId {
        let mut current = self.root;
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            current = match self.child_named(current, Some(segment)) {
                Some(existing) => existing,
                None => {
                    let path = self.nodes[current.0].path.join(segment);
                    self.add_child_directory(current, path, Metadata::degraded(NodeKind::Directory))
                }
            };
        }
        current
    }

    /// Ensures the directory at `relative` (below the root) exists in the model.
    pub fn add_directory(&mut self, relative: &Path) -> NodeId {
        let segments = normal_segments(relative);
        self.find_or_create_path(&segments)
    }

    /// Adds a file under the directory at `relative_dir`, creating it if needed.
    pub fn add_file_at(&mut self, relative_dir: &Path, file: FileNode) -> NodeId {
        let dir = self.add_directory(relative_dir);
        self.add_file(dir, file);
        dir
    }

    /// Depth of a node, counting the root as 0.
    pub fn depth_of(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent.0].parent;
        }
        depth
    }

    /// Path of a node relative to the root, rebuilt from parent links.
    pub fn relative_path(&self, id: NodeId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            names.push(self.nodes[current.0].name());
            current = parent;
        }
        names.iter().rev().collect()
    }

    /// Pre-order listing of every directory and file path.
    pub fn flatten(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(self.nodes.len() + self.file_count());
        self.visit_pre_order(self.root, &mut |node| {
            paths.push(node.path.clone());
            paths.extend(node.files.iter().map(|f| f.path.clone()));
        });
        paths
    }

    /// Metadata for every directory and file, keyed by path.
    pub fn flatten_metadata(&self) -> BTreeMap<PathBuf, Metadata> {
        let mut out = BTreeMap::new();
        for node in &self.nodes {
            out.insert(node.path.clone(), node.metadata.clone());
            for file in &node.files {
                out.insert(file.path.clone(), file.metadata.clone());
            }
        }
        out
    }

    fn visit_pre_order(&self, id: NodeId, visit: &mut dyn FnMut(&DirectoryNode)) {
        let node = &self.nodes[id.0];
        visit(node);
        for &child in &node.children {
            self.visit_pre_order(child, visit);
        }
    }

    /// Recomputes node count, total size and max depth.
    ///
    /// `total_nodes` counts every directory and file below the root. Depth is
    /// measured like the builder measures it: direct children of the root are
    /// at depth 1.
    pub fn walk(&self, token: &CancellationToken) -> Result<TreeMetrics, TreeError> {
        let _enter = self.span.enter();
        let started = Instant::now();

        let mut total_nodes = 0u64;
        let mut total_size = 0u64;
        let mut max_depth = 0usize;
        let mut stack = vec![(self.root, 0usize)];

        while let Some((id, depth)) = stack.pop() {
            if token.is_cancelled() {
                warn!("walk cancelled before completion");
                return Err(TreeError::Cancelled);
            }
            let node = &self.nodes[id.0];
            if !node.files.is_empty() {
                max_depth = max_depth.max(depth + 1);
            }
            for file in &node.files {
                total_nodes += 1;
                total_size += file.metadata.size;
            }
            for &child in node.children.iter().rev() {
                total_nodes += 1;
                max_depth = max_depth.max(depth + 1);
                stack.push((child, depth + 1));
            }
        }

        let mut metrics = self.metrics.lock();
        metrics.total_nodes = total_nodes;
        metrics.total_size = total_size;
        metrics.max_depth = max_depth;
        metrics.processing_time += started.elapsed();
        metrics.last_updated = Some(Utc::now());
        *metrics.operation_counts.entry("walk".to_string()).or_insert(0) += 1;
        debug!(total_nodes, total_size, max_depth, "walk complete");
        Ok(metrics.clone())
    }

    /// Copy of the current metrics.
    pub fn metrics(&self) -> TreeMetrics {
        self.metrics.lock().clone()
    }

    pub fn record_operation(&self, operation: &str) {
        *self
            .metrics
            .lock()
            .operation_counts
            .entry(operation.to_string())
            .or_insert(0) += 1;
    }

    /// Builds the spatial index over every directory whose metadata validates.
    ///
    /// Returns the number of indexed directories.
    pub fn build_spatial_index(&mut self) -> usize {
        let _enter = self.span.enter();
        let mut entries = Vec::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            match MetadataPoint::from_metadata(&node.metadata) {
                Ok(point) => entries.push((point, NodeId(index))),
                Err(err) => debug!(path = %node.path.display(), error = %err, "not indexing directory"),
            }
        }
        let count = entries.len();
        self.spatial = Some(SpatialIndex::build(entries));
        self.record_operation("index");
        info!(indexed = count, "spatial index built");
        count
    }

    /// Adds one directory to the spatial index, building the index if absent.
    pub fn index_directory(&mut self, id: NodeId) -> Result<(), TreeError> {
        let point = MetadataPoint::from_metadata(&self.nodes[id.0].metadata)?;
        match self.spatial.as_mut() {
            Some(index) => index.insert(point, id),
            None => self.spatial = Some(SpatialIndex::build(vec![(point, id)])),
        }
        Ok(())
    }

    pub fn nearest_neighbors(&self, point: &MetadataPoint, k: usize) -> Result<Vec<NodeId>, TreeError> {
        let index = self.spatial.as_ref().ok_or(TreeError::IndexNotBuilt)?;
        Ok(index.nearest_neighbors(point, k))
    }

    pub fn range_query(&self, point: &MetadataPoint, radius: f64) -> Result<Vec<NodeId>, TreeError> {
        let index = self.spatial.as_ref().ok_or(TreeError::IndexNotBuilt)?;
        Ok(index.range_query(point, radius))
    }

    /// Drops every node below the root and the spatial index.
    pub fn cleanup(&mut self) {
        let _enter = self.span.enter();
        self.nodes.truncate(1);
        let root = &mut self.nodes[self.root.0];
        root.children.clear();
        root.files.clear();
        self.spatial = None;
        debug!("tree cleaned up");
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot_of(self.root)
    }

    fn snapshot_of(&self, id: NodeId) -> NodeSnapshot {
        let node = &self.nodes[id.0];
        NodeSnapshot {
            path: node.path.clone(),
            metadata: node.metadata.clone(),
            children: node.children.iter().map(|&c| self.snapshot_of(c)).collect(),
            files: node.files.clone(),
        }
    }

    pub fn from_snapshot(snapshot: NodeSnapshot) -> Self {
        let NodeSnapshot {
            path,
            metadata,
            children,
            files,
        } = snapshot;
        let mut tree = Self::new(path, metadata);
        let root = tree.root;
        tree.nodes[root.0].files = files;
        for child in children {
            tree.attach_snapshot(root, child);
        }
        tree
    }

    fn attach_snapshot(&mut self, parent: NodeId, snapshot: NodeSnapshot) {
        let id = NodeId(self.nodes.len());
        let mut node = DirectoryNode::new(snapshot.path, snapshot.metadata, Some(parent));
        node.files = snapshot.files;
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        for child in snapshot.children {
            self.attach_snapshot(id, child);
        }
    }

    /// Pretty JSON of the nested hierarchy.
    pub fn to_json(&self) -> Result<String, TreeError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let snapshot: NodeSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

fn normal_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
