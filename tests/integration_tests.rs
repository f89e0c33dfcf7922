//! Integration tests for file4you
//!
//! These tests drive the public API end to end on real temporary directories:
//! building trees, organizing with each conflict policy, exporting scans,
//! spatial queries, the command line, and git-backed rewind.
use clap::Parser;
use file4you::builder::{self, TreeBuilder};
use file4you::cancel::CancellationToken;
use file4you::cli::{Cli, run_cli};
use file4you::config::AppConfig;
use file4you::file_category::FileTypeTree;
use file4you::file_ops::FileOps;
use file4you::file_organizer::{ConflictPolicy, OrganizeError, OrganizeParams, Organizer};
use file4you::git::{AUTO_STASH_MESSAGE, GitClient};
use file4you::metadata::Metadata;
use file4you::spatial::MetadataPoint;
use file4you::tree::DirectoryTree;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary workspace with a `source` and a `target` directory.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("source")).expect("Failed to create source");
        TestFixture { temp_dir }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn source(&self) -> PathBuf {
        self.path().join("source")
    }

    fn target(&self) -> PathBuf {
        self.path().join("target")
    }

    /// Create a file under `source`, creating parent directories.
    fn create_file(&self, rel_path: &str, content: &str) {
        let path = self.source().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(path, content).expect("Failed to write file content");
    }

    fn create_target_file(&self, rel_path: &str, content: &str) {
        let path = self.target().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(path, content).expect("Failed to write file content");
    }

    fn assert_target_file(&self, rel_path: &str, content: &str) {
        let path = self.target().join(rel_path);
        let actual = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("File should exist: {}: {}", path.display(), e));
        assert_eq!(actual, content, "Unexpected content in {}", path.display());
    }

    fn assert_source_file_exists(&self, rel_path: &str) {
        let path = self.source().join(rel_path);
        assert!(path.is_file(), "File should exist: {}", path.display());
    }

    fn build(&self) -> DirectoryTree {
        TreeBuilder::new()
            .build_full(&self.source(), true)
            .expect("Failed to build tree")
    }

    fn params(&self) -> OrganizeParams {
        OrganizeParams::new(self.source(), self.target())
    }

    /// Write a config file next to source/target and return its path.
    fn write_config(&self, content: &str) -> PathBuf {
        let path = self.path().join("config.toml");
        fs::write(&path, content).expect("Failed to write config");
        path
    }
}

fn mapping() -> FileTypeTree {
    let mut tree = FileTypeTree::new();
    tree.add_category_path("Notes", [".txt", ".md"]);
    tree.add_category_path("Media/Pics", [".png", ".jpg"]);
    tree.add_category_path("Media/Vids", [".mp4"]);
    tree
}

fn run(args: Vec<OsString>) -> Result<(), String> {
    let cli = Cli::try_parse_from(args).expect("Failed to parse arguments");
    run_cli(cli)
}

fn git_available() -> bool {
    GitClient::new().is_available()
}

fn configure_identity(dir: &Path) {
    for (key, value) in [
        ("user.name", "file4you tests"),
        ("user.email", "tests@file4you.invalid"),
        ("commit.gpgsign", "false"),
    ] {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["config", key, value])
            .status()
            .expect("Failed to configure git");
        assert!(status.success());
    }
}

// ============================================================================
// Tree building
// ============================================================================

#[test]
fn test_build_contains_every_entry_not_ignored() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    fixture.create_file("docs/b.md", "b");
    fixture.create_file("docs/deep/c.png", "c");
    fixture.create_file("logs/app.log", "log");
    fixture.create_file(".file4you-ignore", "logs/\n");

    let tree = fixture.build();
    let paths: BTreeSet<PathBuf> = tree.flatten().into_iter().collect();

    let source = fixture.source();
    for expected in [
        source.clone(),
        source.join("a.txt"),
        source.join("docs"),
        source.join("docs/b.md"),
        source.join("docs/deep"),
        source.join("docs/deep/c.png"),
    ] {
        assert!(paths.contains(&expected), "missing {}", expected.display());
    }
    assert!(!paths.contains(&source.join("logs")));
    assert!(!paths.contains(&source.join("logs/app.log")));
}

#[test]
fn test_max_depth_counts_segments_below_root() {
    let fixture = TestFixture::new();
    fixture.create_file("one/two/three.txt", "x");

    assert_eq!(builder::calculate_max_depth(&fixture.source()).unwrap(), 3);
}

#[test]
fn test_configured_filters_exclude_entries() {
    let fixture = TestFixture::new();
    fixture.create_file("keep.txt", "k");
    fixture.create_file("skip.tmp", "s");
    fixture.create_file(".hidden.txt", "h");

    let config: AppConfig = toml::from_str("[filters.exclude]\nextensions = [\"tmp\"]\n")
        .expect("Failed to parse config");
    let filter = config.compile_filters().expect("Failed to compile filters");
    let tree = TreeBuilder::new()
        .with_filter(filter)
        .build_full(&fixture.source(), true)
        .unwrap();

    let paths = tree.flatten();
    assert!(paths.contains(&fixture.source().join("keep.txt")));
    assert!(!paths.contains(&fixture.source().join("skip.tmp")));
    assert!(!paths.contains(&fixture.source().join(".hidden.txt")));
}

#[test]
fn test_scan_json_round_trip() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    fixture.create_file("sub/b.png", "bb");

    let tree = fixture.build();
    let json = tree.to_json().unwrap();
    let restored = DirectoryTree::from_json(&json).unwrap();

    assert_eq!(restored.flatten(), tree.flatten());
    assert_eq!(restored.flatten_metadata(), tree.flatten_metadata());
}

// ============================================================================
// Category mapping
// ============================================================================

#[test]
fn test_mapping_is_deterministic_for_a_fixed_config() {
    let config = AppConfig::default();
    let first = config.file_type_tree();
    let second = config.file_type_tree();

    for ext in [".txt", ".pdf", ".png", ".mp4", ".zip", ".rs", ".unknown"] {
        assert_eq!(first.destination_for(ext), second.destination_for(ext));
    }
    assert_eq!(first.destination_for(".unknown"), None);
}

#[test]
fn test_nested_categories_from_config() {
    let config: AppConfig = toml::from_str(
        "[file_types]\n\"Media/Pics\" = [\".png\"]\n\"Media/Vids\" = [\".mp4\"]\n",
    )
    .expect("Failed to parse config");
    let tree = config.file_type_tree();

    assert_eq!(tree.destination_for(".PNG"), Some(PathBuf::from("Media/Pics")));
    assert_eq!(tree.destination_for("mp4"), Some(PathBuf::from("Media/Vids")));
}

// ============================================================================
// Organizing
// ============================================================================

#[test]
fn test_organize_moves_nested_files_into_categories() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    fixture.create_file("photos/b.JPG", "b");
    fixture.create_file("photos/clips/c.mp4", "c");
    fixture.create_file("misc/d.xyz", "d");

    let tree = fixture.build();
    let report = Organizer::new()
        .organize(&tree, &mapping(), &fixture.params())
        .unwrap();

    assert_eq!(report.moved, 3);
    assert_eq!(report.unmapped, 1);
    fixture.assert_target_file("Notes/a.txt", "a");
    fixture.assert_target_file("Media/Pics/b.JPG", "b");
    fixture.assert_target_file("Media/Vids/c.mp4", "c");
    fixture.assert_source_file_exists("misc/d.xyz");
}

#[test]
fn test_each_conflict_policy() {
    let cases = [
        (ConflictPolicy::Overwrite, "Notes/a.txt", "new"),
        (ConflictPolicy::Rename, "Notes/a_1.txt", "new"),
        (ConflictPolicy::Skip, "Notes/a.txt", "old"),
    ];

    for (policy, checked, expected) in cases {
        let fixture = TestFixture::new();
        fixture.create_file("a.txt", "new");
        fixture.create_target_file("Notes/a.txt", "old");

        let mut params = fixture.params();
        params.conflict_policy = policy.clone();
        let report = Organizer::new()
            .organize(&fixture.build(), &mapping(), &params)
            .unwrap();

        fixture.assert_target_file(checked, expected);
        match policy {
            ConflictPolicy::Overwrite => assert_eq!(report.overwritten, 1),
            ConflictPolicy::Rename => {
                assert_eq!(report.renamed, 1);
                fixture.assert_target_file("Notes/a.txt", "old");
            }
            _ => {
                assert_eq!(report.skipped_conflicts, 1);
                fixture.assert_source_file_exists("a.txt");
            }
        }
    }
}

#[test]
fn test_dry_run_leaves_filesystem_untouched() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    fixture.create_file("sub/b.png", "b");
    let before = fixture.build().flatten_metadata();

    let mut params = fixture.params();
    params.dry_run = true;
    let report = Organizer::new()
        .organize(&fixture.build(), &mapping(), &params)
        .unwrap();

    assert_eq!(report.planned, 2);
    assert!(!fixture.target().exists());
    let after = fixture.build().flatten_metadata();
    assert_eq!(
        before.keys().collect::<Vec<_>>(),
        after.keys().collect::<Vec<_>>()
    );
}

/// Rename that always fails as if source and destination were on different
/// filesystems.
struct CrossDevice;

impl FileOps for CrossDevice {
    fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::CrossesDevices, "cross-device link"))
    }
}

#[test]
fn test_cross_device_moves_fall_back_to_copy() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "payload");
    fixture.create_file("b.png", "image");

    let report = Organizer::new()
        .with_file_ops(Arc::new(CrossDevice))
        .organize(&fixture.build(), &mapping(), &fixture.params())
        .unwrap();

    assert_eq!(report.moved, 2);
    assert_eq!(report.cross_device, 2);
    fixture.assert_target_file("Notes/a.txt", "payload");
    fixture.assert_target_file("Media/Pics/b.png", "image");
    assert!(!fixture.source().join("a.txt").exists());
}

#[test]
fn test_cancelled_run_moves_nothing() {
    let fixture = TestFixture::new();
    for i in 0..20 {
        fixture.create_file(&format!("f{i}.txt"), "x");
    }

    let token = CancellationToken::new();
    token.cancel();
    let result = Organizer::new().organize_with_token(
        &fixture.build(),
        &mapping(),
        &fixture.params(),
        &token,
    );

    assert!(matches!(result, Err(OrganizeError::Cancelled)));
    for i in 0..20 {
        fixture.assert_source_file_exists(&format!("f{i}.txt"));
    }
}

#[test]
fn test_many_same_named_files_never_clobber_each_other() {
    let fixture = TestFixture::new();
    for i in 0..16 {
        fixture.create_file(&format!("dir{i:02}/notes.txt"), &i.to_string());
    }

    let report = Organizer::new()
        .with_workers(8)
        .organize(&fixture.build(), &mapping(), &fixture.params())
        .unwrap();

    assert_eq!(report.moved, 16);
    assert_eq!(report.renamed, 15);
    let contents: BTreeSet<String> = fs::read_dir(fixture.target().join("Notes"))
        .unwrap()
        .map(|entry| fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    assert_eq!(contents.len(), 16);
}

// ============================================================================
// Spatial queries
// ============================================================================

#[test]
fn test_nearest_directory_to_itself_is_itself() {
    let fixture = TestFixture::new();
    fixture.create_file("a/one.txt", "1");
    fixture.create_file("b/two.txt", "2");

    let mut tree = fixture.build();
    assert_eq!(tree.build_spatial_index(), 3);

    let reference = fixture.source().join("a");
    let point = MetadataPoint::from_metadata(&Metadata::from_path(&reference).unwrap()).unwrap();
    let nearest = tree.nearest_neighbors(&point, 1).unwrap();
    assert_eq!(nearest.len(), 1);
    let found = &tree.node(nearest[0]).path;
    let found_point =
        MetadataPoint::from_metadata(&tree.node(nearest[0]).metadata).unwrap();
    assert_eq!(found_point.distance_squared(&point), 0.0, "nearest was {}", found.display());

    let within = tree.range_query(&point, 0.0).unwrap();
    assert!(within.contains(&nearest[0]));
}

// ============================================================================
// Command line
// ============================================================================

#[test]
fn test_cli_organize_with_explicit_config() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    fixture.create_file("b.png", "b");
    let config = fixture.write_config(
        "[file_types]\nText = [\".txt\"]\nImages = [\".png\"]\n\n[organize]\nworkers = 2\n",
    );

    run(vec![
        "file4you".into(),
        "--config".into(),
        config.into_os_string(),
        "organize".into(),
        fixture.source().into_os_string(),
        "--target".into(),
        fixture.target().into_os_string(),
    ])
    .unwrap();

    fixture.assert_target_file("Text/a.txt", "a");
    fixture.assert_target_file("Images/b.png", "b");
}

#[test]
fn test_cli_dry_run_and_scan_output() {
    let fixture = TestFixture::new();
    fixture.create_file("a.txt", "a");
    let config = fixture.write_config("[file_types]\nText = [\".txt\"]\n");
    let scan_path = fixture.path().join("scan.json");

    run(vec![
        "file4you".into(),
        "--config".into(),
        config.clone().into_os_string(),
        "organize".into(),
        fixture.source().into_os_string(),
        "--dry-run".into(),
    ])
    .unwrap();
    fixture.assert_source_file_exists("a.txt");
    assert!(!fixture.source().join("Text").exists());

    run(vec![
        "file4you".into(),
        "--config".into(),
        config.into_os_string(),
        "scan".into(),
        fixture.source().into_os_string(),
        "--output".into(),
        scan_path.clone().into_os_string(),
    ])
    .unwrap();
    let json = fs::read_to_string(&scan_path).unwrap();
    let tree = DirectoryTree::from_json(&json).unwrap();
    assert!(tree.flatten().contains(&fixture.source().join("a.txt")));
}

#[test]
fn test_cli_rejects_bad_config() {
    let fixture = TestFixture::new();
    let config = fixture.write_config("[organize]\nworkers = 0\n");

    let err = run(vec![
        "file4you".into(),
        "--config".into(),
        config.into_os_string(),
        "index".into(),
        fixture.source().into_os_string(),
    ])
    .unwrap_err();
    assert!(err.contains("workers"));
}

// ============================================================================
// Git integration
// ============================================================================

#[test]
fn test_organize_commits_and_rewinds() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let fixture = TestFixture::new();
    let git = Arc::new(GitClient::new());
    fs::create_dir_all(fixture.target()).unwrap();
    git.init_repo(&fixture.target()).unwrap();
    configure_identity(&fixture.target());

    let mut params = fixture.params();
    params.git_enabled = true;

    fixture.create_file("first.txt", "1");
    Organizer::new()
        .with_git(git.clone())
        .organize(&fixture.build(), &mapping(), &params)
        .unwrap();

    fixture.create_file("second.txt", "2");
    Organizer::new()
        .with_git(git.clone())
        .organize(&fixture.build(), &mapping(), &params)
        .unwrap();

    let history = git.commit_history(&fixture.target()).unwrap();
    assert_eq!(history.len(), 2);
    assert!(!git.has_uncommitted_changes(&fixture.target()).unwrap());

    let commit = git.rewind(&fixture.target(), "1").unwrap();
    assert_eq!(commit, history[1]);
    fixture.assert_target_file("Notes/first.txt", "1");
    assert!(!fixture.target().join("Notes/second.txt").exists());

    let err = git.rewind(&fixture.target(), "2").unwrap_err();
    assert!(err.to_string().contains("2"));
}

#[test]
fn test_cli_stash_refuses_to_stash_the_source_itself() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let fixture = TestFixture::new();
    let git = GitClient::new();
    let repo = fixture.source();
    fixture.create_file("README.md", "readme");
    git.init_repo(&repo).unwrap();
    configure_identity(&repo);
    git.add_and_commit(&repo, "initial").unwrap();
    fixture.create_file("a.txt", "a");
    fixture.create_file("b.pdf", "b");
    let config = fixture.write_config("[file_types]\nNotes = [\".txt\"]\nPDFS = [\".pdf\"]\n");

    let err = run(vec![
        "file4you".into(),
        "--config".into(),
        config.into_os_string(),
        "organize".into(),
        repo.clone().into_os_string(),
        "--stash".into(),
    ])
    .unwrap_err();

    assert!(err.contains("--stash"), "unexpected error: {err}");
    fixture.assert_source_file_exists("a.txt");
    fixture.assert_source_file_exists("b.pdf");
    assert!(!repo.join("Notes").exists());
    assert!(!git.has_auto_stash(&repo).unwrap());
    assert_eq!(git.commit_history(&repo).unwrap().len(), 1);
}

#[test]
fn test_cli_stash_with_separate_target_restores_local_edits() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let fixture = TestFixture::new();
    let git = GitClient::new();
    fixture.create_target_file("README.md", "original");
    git.init_repo(&fixture.target()).unwrap();
    configure_identity(&fixture.target());
    git.add_and_commit(&fixture.target(), "initial").unwrap();
    fs::write(fixture.target().join("README.md"), "local edit").unwrap();

    fixture.create_file("a.txt", "a");
    let config = fixture.write_config("[file_types]\nNotes = [\".txt\"]\n");

    run(vec![
        "file4you".into(),
        "--config".into(),
        config.into_os_string(),
        "organize".into(),
        fixture.source().into_os_string(),
        "--target".into(),
        fixture.target().into_os_string(),
        "--stash".into(),
    ])
    .unwrap();

    fixture.assert_target_file("Notes/a.txt", "a");
    fixture.assert_target_file("README.md", "local edit");
    assert!(!git.has_auto_stash(&fixture.target()).unwrap());
    assert_eq!(git.commit_history(&fixture.target()).unwrap().len(), 2);
}

#[test]
fn test_auto_stash_is_restored_after_commit() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let fixture = TestFixture::new();
    let git = Arc::new(GitClient::new());
    fixture.create_target_file("README.md", "original");
    git.init_repo(&fixture.target()).unwrap();
    configure_identity(&fixture.target());
    git.add_and_commit(&fixture.target(), "initial").unwrap();

    fs::write(fixture.target().join("README.md"), "local edit").unwrap();
    git.stash_create(&fixture.target(), AUTO_STASH_MESSAGE).unwrap();
    assert!(git.has_auto_stash(&fixture.target()).unwrap());
    fixture.assert_target_file("README.md", "original");

    fixture.create_file("a.txt", "a");
    let mut params = fixture.params();
    params.git_enabled = true;
    Organizer::new()
        .with_git(git.clone())
        .organize(&fixture.build(), &mapping(), &params)
        .unwrap();

    fixture.assert_target_file("README.md", "local edit");
    fixture.assert_target_file("Notes/a.txt", "a");
    assert!(!git.has_auto_stash(&fixture.target()).unwrap());
    assert_eq!(git.commit_history(&fixture.target()).unwrap().len(), 2);
}
