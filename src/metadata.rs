//! Per-entry metadata captured while building a directory tree.
//!
//! Every node in the tree model carries a [`Metadata`] value. Metadata read
//! from the filesystem is best-effort: creation time and owner are not
//! available on every platform, and an entry whose info could not be read at
//! all gets [`Metadata::degraded`], which fails [`Metadata::validate`] and is
//! therefore kept out of the spatial index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Files up to this many bytes are tagged `small`.
pub const SIZE_THRESHOLD_SMALL: u64 = 1_000;
/// Files up to this many bytes (and above the small threshold) are tagged `medium`.
pub const SIZE_THRESHOLD_MEDIUM: u64 = 1_000_000;

const PERM_OWNER_READ: u32 = 0o400;
const PERM_OWNER_WRITE: u32 = 0o200;

/// Owner string used when the platform cannot report one.
pub const UNKNOWN_OWNER: &str = "unknown";

/// The kind of filesystem entry a node describes.
///
/// `Unknown` only appears when reading an exported scan that names a kind this
/// version does not recognize. Such metadata never validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
            NodeKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Tags derived from metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Small,
    Medium,
    Large,
    File,
    Folder,
    Readable,
    Writable,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Small => "small",
            Tag::Medium => "medium",
            Tag::Large => "large",
            Tag::File => "file",
            Tag::Folder => "folder",
            Tag::Readable => "readable",
            Tag::Writable => "writable",
        }
    }

    /// Size class for a byte count.
    pub fn for_size(size: u64) -> Tag {
        if size > SIZE_THRESHOLD_MEDIUM {
            Tag::Large
        } else if size > SIZE_THRESHOLD_SMALL {
            Tag::Medium
        } else {
            Tag::Small
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons metadata fails validation.
///
/// Sizes are unsigned, so a negative size cannot be constructed; an exported
/// scan carrying one is rejected when it is parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("modified time cannot be unset")]
    MissingModifiedTime,
    #[error("invalid node kind: {0}")]
    InvalidKind(NodeKind),
}

/// Attributes of a single file or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub kind: NodeKind,
    /// Permission bits (`0o777` mask on unix).
    pub permissions: u32,
    pub owner: String,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

impl Metadata {
    /// Captures metadata from a `std::fs::Metadata` and derives its tags.
    pub fn from_fs(meta: &fs::Metadata) -> Self {
        let kind = if meta.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };

        let mut metadata = Self {
            size: meta.len(),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            created_at: meta.created().ok().map(DateTime::<Utc>::from),
            kind,
            permissions: permission_bits(meta),
            owner: owner_of(meta),
            tags: BTreeSet::new(),
        };
        // Tags are best-effort; a platform without mtimes yields none.
        let _ = metadata.refresh_tags();
        metadata
    }

    /// Reads metadata for a path, following symlinks.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|meta| Self::from_fs(&meta))
    }

    /// Placeholder metadata for an entry whose info could not be read.
    pub fn degraded(kind: NodeKind) -> Self {
        Self {
            size: 0,
            modified_at: None,
            created_at: None,
            kind,
            permissions: 0,
            owner: UNKNOWN_OWNER.to_string(),
            tags: BTreeSet::new(),
        }
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.modified_at.is_none() {
            return Err(MetadataError::MissingModifiedTime);
        }
        if !matches!(self.kind, NodeKind::File | NodeKind::Directory) {
            return Err(MetadataError::InvalidKind(self.kind));
        }
        Ok(())
    }

    /// Derives kind, size-class and permission tags.
    pub fn generate_tags(&self) -> Result<BTreeSet<Tag>, MetadataError> {
        self.validate()?;

        let mut tags = BTreeSet::new();
        match self.kind {
            NodeKind::Directory => {
                tags.insert(Tag::Folder);
            }
            NodeKind::File => {
                tags.insert(Tag::File);
            }
            NodeKind::Unknown => {}
        }
        tags.insert(Tag::for_size(self.size));
        if self.permissions & PERM_OWNER_WRITE != 0 {
            tags.insert(Tag::Writable);
        }
        if self.permissions & PERM_OWNER_READ != 0 {
            tags.insert(Tag::Readable);
        }
        Ok(tags)
    }

    pub fn refresh_tags(&mut self) -> Result<(), MetadataError> {
        self.tags = self.generate_tags()?;
        Ok(())
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

#[cfg(unix)]
fn owner_of(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    meta.uid().to_string()
}

#[cfg(not(unix))]
fn owner_of(_meta: &fs::Metadata) -> String {
    UNKNOWN_OWNER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(kind: NodeKind, size: u64, permissions: u32) -> Metadata {
        Metadata {
            size,
            modified_at: Some(Utc::now()),
            created_at: None,
            kind,
            permissions,
            owner: UNKNOWN_OWNER.to_string(),
            tags: BTreeSet::new(),
        }
    }

    #[test]
    fn test_size_class_thresholds() {
        assert_eq!(Tag::for_size(0), Tag::Small);
        assert_eq!(Tag::for_size(1_000), Tag::Small);
        assert_eq!(Tag::for_size(1_001), Tag::Medium);
        assert_eq!(Tag::for_size(1_000_000), Tag::Medium);
        assert_eq!(Tag::for_size(1_000_001), Tag::Large);
    }

    #[test]
    fn test_generate_tags_for_file() {
        let meta = sample(NodeKind::File, 5_000, 0o644);
        let tags = meta.generate_tags().unwrap();

        assert!(tags.contains(&Tag::File));
        assert!(tags.contains(&Tag::Medium));
        assert!(tags.contains(&Tag::Readable));
        assert!(tags.contains(&Tag::Writable));
        assert!(!tags.contains(&Tag::Folder));
    }

    #[test]
    fn test_generate_tags_read_only_directory() {
        let meta = sample(NodeKind::Directory, 0, 0o555);
        let tags = meta.generate_tags().unwrap();

        assert!(tags.contains(&Tag::Folder));
        assert!(tags.contains(&Tag::Readable));
        assert!(!tags.contains(&Tag::Writable));
    }

    #[test]
    fn test_validate_rejects_missing_modified_time() {
        let meta = Metadata::degraded(NodeKind::File);
        assert_eq!(meta.validate(), Err(MetadataError::MissingModifiedTime));
        assert!(meta.generate_tags().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let meta = sample(NodeKind::Unknown, 10, 0o644);
        assert_eq!(
            meta.validate(),
            Err(MetadataError::InvalidKind(NodeKind::Unknown))
        );
    }

    #[test]
    fn test_unrecognized_kind_parses_as_unknown() {
        let json = r#"{
            "size": 3,
            "modified_at": "2024-01-01T00:00:00Z",
            "kind": "symlink",
            "permissions": 420,
            "owner": "unknown"
        }"#;
        let meta: Metadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.kind, NodeKind::Unknown);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_negative_size_is_rejected_on_parse() {
        let json = r#"{
            "size": -1,
            "modified_at": "2024-01-01T00:00:00Z",
            "kind": "file",
            "permissions": 420,
            "owner": "unknown"
        }"#;
        assert!(serde_json::from_str::<Metadata>(json).is_err());
    }

    #[test]
    fn test_from_path_reads_real_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file_path = temp_dir.path().join("notes.txt");
        fs::write(&file_path, "hello").expect("Failed to write file");

        let meta = Metadata::from_path(&file_path).unwrap();
        assert_eq!(meta.kind, NodeKind::File);
        assert_eq!(meta.size, 5);
        assert!(meta.validate().is_ok());
        assert!(meta.tags.contains(&Tag::Small));
        assert!(meta.tags.contains(&Tag::File));
    }

    #[test]
    fn test_directory_size_comes_from_the_filesystem() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        for i in 0..50 {
            fs::write(temp_dir.path().join(format!("entry_{i:03}.txt")), "x")
                .expect("Failed to write file");
        }

        let meta = Metadata::from_path(temp_dir.path()).unwrap();
        assert_eq!(meta.kind, NodeKind::Directory);
        assert_eq!(meta.size, fs::metadata(temp_dir.path()).unwrap().len());
        assert!(meta.tags.contains(&Tag::for_size(meta.size)));
        assert!(meta.tags.contains(&Tag::Folder));
    }
}
