//! Category-mapping tree: which folder each file extension belongs in.
//!
//! Categories form a tree below an unnamed root. A category name containing
//! `/` (for example `"Media/Pics"`) creates nested categories. The destination
//! for an extension is found by a depth-first pre-order search in insertion
//! order; the first category accepting the extension wins, so a fixed
//! configuration always yields the same destination.
//!
//! # Examples
//!
//! ```
//! use file4you::file_category::FileTypeTree;
//! use std::path::PathBuf;
//!
//! let mut tree = FileTypeTree::new();
//! tree.add_category_path("Media/Pics", [".PNG", "jpg"]);
//!
//! assert_eq!(tree.destination_for(".png"), Some(PathBuf::from("Media/Pics")));
//! assert_eq!(tree.destination_for(".jpg"), Some(PathBuf::from("Media/Pics")));
//! assert_eq!(tree.destination_for(".exe"), None);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

const ROOT_NAME: &str = "root";

/// Index of a category node inside its [`FileTypeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileTypeId(usize);

/// One category in the mapping tree.
#[derive(Debug, Clone)]
pub struct FileTypeNode {
    pub name: String,
    extensions: BTreeSet<String>,
    children: Vec<FileTypeId>,
    parent: Option<FileTypeId>,
    is_root: bool,
}

impl FileTypeNode {
    fn new(name: &str, parent: Option<FileTypeId>, is_root: bool) -> Self {
        Self {
            name: name.to_string(),
            extensions: BTreeSet::new(),
            children: Vec::new(),
            parent,
            is_root,
        }
    }

    /// Returns true if this category accepts the (normalized) extension.
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn children(&self) -> &[FileTypeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<FileTypeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }
}

/// The category-mapping tree, immutable once a run starts.
#[derive(Debug, Clone)]
pub struct FileTypeTree {
    nodes: Vec<FileTypeNode>,
}

impl FileTypeTree {
    pub const ROOT: FileTypeId = FileTypeId(0);

    /// Creates a tree with no categories.
    pub fn new() -> Self {
        Self {
            nodes: vec![FileTypeNode::new(ROOT_NAME, None, true)],
        }
    }

    /// Builds a tree from a `category -> extensions` table.
    ///
    /// Categories are inserted in the table's key order.
    pub fn from_mapping(mapping: &BTreeMap<String, Vec<String>>) -> Self {
        let mut tree = Self::new();
        for (name, extensions) in mapping {
            tree.add_category_path(name, extensions);
        }
        tree
    }

    pub fn node(&self, id: FileTypeId) -> &FileTypeNode {
        &self.nodes[id.0]
    }

    /// Number of categories, root excluded.
    pub fn category_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Adds (or extends) the child category `name` under `parent`.
    ///
    /// Extensions are normalized to lowercase with a leading dot; blank entries
    /// are ignored.
    pub fn add_category<I, S>(&mut self, parent: FileTypeId, name: &str, extensions: I) -> FileTypeId
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = match self.child_named(parent, name) {
            Some(existing) => existing,
            None => {
                let id = FileTypeId(self.nodes.len());
                self.nodes.push(FileTypeNode::new(name, Some(parent), false));
                self.nodes[parent.0].children.push(id);
                id
            }
        };

        let node = &mut self.nodes[id.0];
        for ext in extensions {
            let ext = normalize_extension(ext.as_ref());
            if !ext.is_empty() {
                node.extensions.insert(ext);
            }
        }
        id
    }

    /// Adds a category given as a `/`-separated path, creating parents as needed.
    pub fn add_category_path<I, S>(&mut self, path: &str, extensions: I) -> FileTypeId
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return Self::ROOT;
        };

        let mut parent = Self::ROOT;
        for segment in parents {
            parent = self.add_category(parent, segment, std::iter::empty::<&str>());
        }
        self.add_category(parent, leaf, extensions)
    }

    fn child_named(&self, parent: FileTypeId, name: &str) -> Option<FileTypeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].name == name)
    }

    /// First category (pre-order, root excluded) accepting `ext`.
    pub fn find_category(&self, ext: &str) -> Option<FileTypeId> {
        let ext = normalize_extension(ext);
        if ext.is_empty() {
            return None;
        }

        let mut stack: Vec<FileTypeId> = self.nodes[Self::ROOT.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.allows_extension(&ext) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Relative destination folder for an extension.
    pub fn destination_for(&self, ext: &str) -> Option<PathBuf> {
        self.find_category(ext).map(|id| self.path_of(id))
    }

    /// Path of category names from just below the root down to `id`.
    pub fn path_of(&self, id: FileTypeId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = &self.nodes[cur.0];
            if node.is_root {
                break;
            }
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.iter().rev().collect()
    }

    /// Every category with its path, in pre-order.
    pub fn categories(&self) -> Vec<(PathBuf, &FileTypeNode)> {
        let mut out = Vec::with_capacity(self.category_count());
        let mut stack: Vec<FileTypeId> = self.nodes[Self::ROOT.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            out.push((self.path_of(id), node));
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }
}

impl Default for FileTypeTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases an extension and ensures it starts with a dot.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.is_empty() || ext == "." {
        return String::new();
    }
    let lower = ext.to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("PNG"), ".png");
        assert_eq!(normalize_extension(".Md"), ".md");
        assert_eq!(normalize_extension("  "), "");
        assert_eq!(normalize_extension("."), "");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut tree = FileTypeTree::new();
        tree.add_category(FileTypeTree::ROOT, "Pics", [".png"]);

        assert_eq!(tree.destination_for(".PNG"), Some(PathBuf::from("Pics")));
        assert_eq!(tree.destination_for("png"), Some(PathBuf::from("Pics")));
    }

    #[test]
    fn test_empty_extension_never_matches() {
        let mut tree = FileTypeTree::new();
        tree.add_category(FileTypeTree::ROOT, "Misc", ["", "."]);
        assert!(tree.node(FileTypeId(1)).extensions().is_empty());
        assert_eq!(tree.destination_for(""), None);
    }

    #[test]
    fn test_first_match_in_pre_order_wins() {
        let mut tree = FileTypeTree::new();
        let b = tree.add_category(FileTypeTree::ROOT, "B", std::iter::empty::<&str>());
        tree.add_category(b, "Inner", [".txt"]);
        tree.add_category(FileTypeTree::ROOT, "A", [".txt"]);

        // B was inserted first, so its subtree is searched first.
        assert_eq!(tree.destination_for(".txt"), Some(PathBuf::from("B/Inner")));
    }

    #[test]
    fn test_from_mapping_is_deterministic() {
        let mut mapping = BTreeMap::new();
        mapping.insert("Notes".to_string(), vec![".txt".to_string()]);
        mapping.insert("Archive/Text".to_string(), vec![".txt".to_string(), ".log".to_string()]);

        let first = FileTypeTree::from_mapping(&mapping);
        let second = FileTypeTree::from_mapping(&mapping);

        assert_eq!(first.destination_for(".txt"), Some(PathBuf::from("Archive/Text")));
        assert_eq!(first.destination_for(".txt"), second.destination_for(".txt"));
        assert_eq!(first.destination_for(".log"), Some(PathBuf::from("Archive/Text")));
    }

    #[test]
    fn test_nested_paths_share_parents() {
        let mut tree = FileTypeTree::new();
        let pics = tree.add_category_path("Media/Pics", [".png"]);
        let vids = tree.add_category_path("Media/Vids", [".mp4"]);

        assert_eq!(tree.category_count(), 3);
        assert_eq!(tree.node(pics).parent(), tree.node(vids).parent());
        assert_eq!(tree.path_of(vids), PathBuf::from("Media/Vids"));
        assert!(tree.node(FileTypeTree::ROOT).is_root());
    }

    #[test]
    fn test_re_adding_category_merges_extensions() {
        let mut tree = FileTypeTree::new();
        let first = tree.add_category(FileTypeTree::ROOT, "Docs", [".doc"]);
        let second = tree.add_category(FileTypeTree::ROOT, "Docs", [".docx"]);

        assert_eq!(first, second);
        assert!(tree.node(first).allows_extension(".doc"));
        assert!(tree.node(first).allows_extension(".docx"));
    }

    #[test]
    fn test_categories_lists_pre_order() {
        let mut tree = FileTypeTree::new();
        tree.add_category_path("Media/Pics", [".png"]);
        tree.add_category_path("Notes", [".md"]);

        let paths: Vec<PathBuf> = tree.categories().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("Media"),
                PathBuf::from("Media/Pics"),
                PathBuf::from("Notes")
            ]
        );
    }
}
