//! Command-line interface for file4you.
//!
//! Parses arguments with `clap`, loads configuration, installs logging and
//! dispatches each subcommand to the library operation behind it.

use crate::builder::{self, TreeBuilder};
use crate::cancel::CancellationToken;
use crate::config::AppConfig;
use crate::file_organizer::{ConflictPolicy, OrganizeParams, Organizer};
use crate::git::{AUTO_STASH_MESSAGE, GitClient};
use crate::logging::{self, LoggingError};
use crate::metadata::Metadata;
use crate::output::OutputFormatter;
use crate::spatial::MetadataPoint;
use crate::tree::DirectoryTree;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "file4you", version, about = "Organize files into category folders")]
pub struct Cli {
    /// Configuration file; overrides the workspace and global lookup.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Move or copy files into category folders.
    Organize(OrganizeArgs),

    /// Export the directory hierarchy as JSON.
    Scan {
        dir: PathBuf,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the metadata index and print tree metrics.
    Index { dir: PathBuf },

    /// Directories whose metadata is closest to a reference path.
    Nearest {
        dir: PathBuf,
        reference: PathBuf,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Directories within a metadata distance of a reference path.
    Range {
        dir: PathBuf,
        reference: PathBuf,
        radius: f64,
    },

    /// Initialize a git repository unless one exists.
    Init { dir: PathBuf },

    /// List commits, newest first.
    History { dir: PathBuf },

    /// Check out a commit by id or by steps back from the newest.
    Rewind { dir: PathBuf, target: String },

    /// Stash or restore uncommitted changes.
    Stash {
        dir: PathBuf,
        #[command(subcommand)]
        action: StashAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum StashAction {
    Push {
        #[arg(short, long, default_value = AUTO_STASH_MESSAGE)]
        message: String,
    },
    Pop {
        /// Discard local versions of conflicting files and pop again.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    pub source: PathBuf,

    /// Destination root; defaults to `target_dir` from config, then the source.
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    #[arg(long)]
    pub no_recursive: bool,

    /// Copy instead of moving.
    #[arg(long)]
    pub copy: bool,

    /// With --copy, delete each source after copying it.
    #[arg(long, requires = "copy")]
    pub remove_after: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// overwrite, skip or rename; defaults to the configured policy.
    #[arg(long, value_name = "POLICY")]
    pub conflict: Option<String>,

    /// Commit the result in the target directory.
    #[arg(long)]
    pub git: bool,

    /// Stash uncommitted changes in the target first; implies --git.
    #[arg(long)]
    pub stash: bool,

    #[arg(long)]
    pub max_depth: Option<usize>,

    #[arg(long)]
    pub workers: Option<usize>,
}

/// Runs one parsed command line.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use file4you::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["file4you", "organize", "Downloads", "--dry-run"]);
/// if let Err(e) = run_cli(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let config = AppConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;

    match logging::init_logging(&config.logging) {
        Ok(()) => {}
        Err(LoggingError::Install(reason)) => debug!(%reason, "log subscriber already installed"),
        Err(e) => return Err(e.to_string()),
    }

    match cli.command {
        Command::Organize(args) => organize(&config, args),
        Command::Scan { dir, output } => scan(&config, &dir, output.as_deref()),
        Command::Index { dir } => index(&config, &dir),
        Command::Nearest { dir, reference, k } => {
            let (tree, point) = indexed_tree(&config, &dir, &reference)?;
            let ids = tree.nearest_neighbors(&point, k).map_err(|e| e.to_string())?;
            OutputFormatter::path_list(
                &format!("{} NEAREST TO {}", ids.len(), reference.display()),
                ids.iter().map(|&id| tree.node(id).path.as_path()),
            );
            Ok(())
        }
        Command::Range { dir, reference, radius } => {
            let (tree, point) = indexed_tree(&config, &dir, &reference)?;
            let ids = tree.range_query(&point, radius).map_err(|e| e.to_string())?;
            OutputFormatter::path_list(
                &format!("WITHIN {} OF {}", radius, reference.display()),
                ids.iter().map(|&id| tree.node(id).path.as_path()),
            );
            Ok(())
        }
        Command::Init { dir } => {
            let created = git_client(&config).init_repo(&dir).map_err(|e| e.to_string())?;
            if created {
                OutputFormatter::success(&format!("Initialized repository in {}", dir.display()));
            } else {
                OutputFormatter::info(&format!("{} is already a repository", dir.display()));
            }
            Ok(())
        }
        Command::History { dir } => {
            let commits = git_client(&config).commit_history(&dir).map_err(|e| e.to_string())?;
            OutputFormatter::history(&commits);
            Ok(())
        }
        Command::Rewind { dir, target } => {
            let commit = git_client(&config)
                .rewind(&dir, &target)
                .map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Checked out {}", commit));
            Ok(())
        }
        Command::Stash { dir, action } => {
            let git = git_client(&config);
            match action {
                StashAction::Push { message } => {
                    git.stash_create(&dir, &message).map_err(|e| e.to_string())?;
                    OutputFormatter::success("Stashed uncommitted changes");
                }
                StashAction::Pop { force } => {
                    git.stash_pop(&dir, force).map_err(|e| e.to_string())?;
                    OutputFormatter::success("Restored stashed changes");
                }
            }
            Ok(())
        }
    }
}

fn git_client(config: &AppConfig) -> GitClient {
    GitClient::new().with_timeout(config.organize.git_timeout())
}

fn build_tree(
    config: &AppConfig,
    dir: &Path,
    recursive: bool,
    max_depth: Option<usize>,
) -> Result<DirectoryTree, String> {
    let filter = config
        .compile_filters()
        .map_err(|e| format!("Error compiling filters: {}", e))?;
    let max_depth = match max_depth {
        Some(depth) => depth,
        None => builder::calculate_max_depth(dir).map_err(|e| e.to_string())?,
    };
    TreeBuilder::new()
        .with_filter(filter)
        .build(dir, recursive, max_depth)
        .map_err(|e| format!("Error reading {}: {}", dir.display(), e))
}

fn organize(config: &AppConfig, args: OrganizeArgs) -> Result<(), String> {
    let target = args
        .target
        .clone()
        .or_else(|| config.target_dir.clone())
        .unwrap_or_else(|| args.source.clone());
    let git = Arc::new(git_client(config));
    let git_enabled = args.git || args.stash;

    if args.stash && !args.dry_run {
        auto_stash(&git, &args.source, &target)?;
    }

    let conflict_policy = ConflictPolicy::parse(
        args.conflict
            .as_deref()
            .unwrap_or(&config.organize.conflict_policy),
    );
    if let ConflictPolicy::Unrecognized(policy) = &conflict_policy {
        OutputFormatter::warning(&format!(
            "Unknown conflict policy '{}'; conflicting files will be skipped",
            policy
        ));
    }

    let mut tree = build_tree(config, &args.source, !args.no_recursive, args.max_depth)?;
    let params = OrganizeParams {
        source_dir: args.source.clone(),
        target_dir: target.clone(),
        recursive: !args.no_recursive,
        copy_files: args.copy,
        remove_after: args.remove_after,
        dry_run: args.dry_run,
        conflict_policy,
        git_enabled,
        max_depth: args.max_depth,
    };

    if args.dry_run {
        OutputFormatter::dry_run_notice(&format!("Analyzing contents of {}", args.source.display()));
    } else {
        OutputFormatter::info(&format!(
            "Organizing {} into {}",
            args.source.display(),
            target.display()
        ));
    }

    let progress = OutputFormatter::create_progress_bar(tree.file_count() as u64);
    let mut organizer = Organizer::new()
        .with_timeout(config.organize.timeout())
        .with_git(git)
        .with_progress(progress.clone());
    if let Some(workers) = args.workers.or(config.organize.workers) {
        organizer = organizer.with_workers(workers);
    }

    let result = organizer.organize(&tree, &config.file_type_tree(), &params);
    progress.finish_and_clear();
    tree.cleanup();

    let report = result.map_err(|e| e.to_string())?;
    OutputFormatter::organize_report(&report, args.dry_run);
    if git_enabled && !args.dry_run {
        OutputFormatter::plain(&format!(
            "Committed. Use 'file4you rewind {} 1' to undo.",
            target.display()
        ));
    }
    Ok(())
}

/// Stashes uncommitted changes in `target` under the auto-stash message.
///
/// Refuses when `source` lies inside the target's repository, since the stash
/// would take the very files about to be organized.
fn auto_stash(git: &GitClient, source: &Path, target: &Path) -> Result<(), String> {
    if !git.is_repo(target) {
        info!(target = %target.display(), "not a repository yet, nothing to stash");
        return Ok(());
    }
    let history = git.commit_history(target).map_err(|e| e.to_string())?;
    if history.is_empty() {
        warn!(target = %target.display(), "repository has no commits, cannot stash");
        return Ok(());
    }
    if !git.has_uncommitted_changes(target).map_err(|e| e.to_string())? {
        return Ok(());
    }

    let root = git.repo_root(target).map_err(|e| e.to_string())?;
    if source_in_repo(source, &root) {
        return Err(format!(
            "--stash would stash the files being organized: {} is inside the repository at {}. \
             Pass a --target outside the source, or commit the source files first.",
            source.display(),
            root.display()
        ));
    }

    git.stash_create(target, AUTO_STASH_MESSAGE)
        .map_err(|e| e.to_string())?;
    OutputFormatter::info("Stashed uncommitted changes before organizing");
    Ok(())
}

fn source_in_repo(source: &Path, repo_root: &Path) -> bool {
    let root = fs::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf());
    match fs::canonicalize(source) {
        Ok(source) => source.starts_with(&root),
        Err(_) => source.starts_with(&root),
    }
}

fn scan(config: &AppConfig, dir: &Path, output: Option<&Path>) -> Result<(), String> {
    let tree = build_tree(config, dir, true, None)?;
    let json = tree.to_json().map_err(|e| e.to_string())?;
    match output {
        Some(path) => {
            fs::write(path, json)
                .map_err(|e| format!("Error writing {}: {}", path.display(), e))?;
            OutputFormatter::success(&format!(
                "Wrote {} directories and {} files to {}",
                tree.directory_count(),
                tree.file_count(),
                path.display()
            ));
        }
        None => OutputFormatter::plain(&json),
    }
    Ok(())
}

fn index(config: &AppConfig, dir: &Path) -> Result<(), String> {
    let mut tree = build_tree(config, dir, true, None)?;
    let indexed = tree.build_spatial_index();
    let metrics = tree
        .walk(&CancellationToken::new())
        .map_err(|e| e.to_string())?;

    OutputFormatter::header("INDEX");
    OutputFormatter::plain(&format!("  indexed directories: {}", indexed));
    OutputFormatter::plain(&format!("  total nodes:         {}", metrics.total_nodes));
    OutputFormatter::plain(&format!("  total size:          {} bytes", metrics.total_size));
    OutputFormatter::plain(&format!("  max depth:           {}", metrics.max_depth));
    Ok(())
}

fn indexed_tree(
    config: &AppConfig,
    dir: &Path,
    reference: &Path,
) -> Result<(DirectoryTree, MetadataPoint), String> {
    let metadata = Metadata::from_path(reference)
        .map_err(|e| format!("Error reading {}: {}", reference.display(), e))?;
    let point = MetadataPoint::from_metadata(&metadata).map_err(|e| e.to_string())?;

    let mut tree = build_tree(config, dir, true, None)?;
    tree.build_spatial_index();
    Ok((tree, point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[test]
    fn test_parse_organize_flags() {
        let cli = Cli::try_parse_from([
            "file4you",
            "organize",
            "in",
            "--target",
            "out",
            "--copy",
            "--remove-after",
            "--dry-run",
            "--conflict",
            "skip",
            "--workers",
            "3",
        ])
        .unwrap();

        let Command::Organize(args) = cli.command else {
            panic!("expected organize");
        };
        assert_eq!(args.source, PathBuf::from("in"));
        assert_eq!(args.target, Some(PathBuf::from("out")));
        assert!(args.copy && args.remove_after && args.dry_run);
        assert_eq!(args.conflict.as_deref(), Some("skip"));
        assert_eq!(args.workers, Some(3));
        assert!(!args.git);
    }

    #[test]
    fn test_remove_after_requires_copy() {
        let result = Cli::try_parse_from(["file4you", "organize", "in", "--remove-after"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_stash_and_global_config() {
        let cli = Cli::try_parse_from(["file4you", "stash", "repo", "pop", "--force", "--config", "c.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        match cli.command {
            Command::Stash { dir, action: StashAction::Pop { force } } => {
                assert_eq!(dir, PathBuf::from("repo"));
                assert!(force);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["file4you", "stash", "repo", "push"]).unwrap();
        match cli.command {
            Command::Stash { action: StashAction::Push { message }, .. } => {
                assert_eq!(message, AUTO_STASH_MESSAGE);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_source_in_repo() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo = temp_dir.path().join("repo");
        let inbox = repo.join("inbox");
        let outside = temp_dir.path().join("downloads");
        fs::create_dir_all(&inbox).expect("Failed to create directory");
        fs::create_dir_all(&outside).expect("Failed to create directory");

        assert!(source_in_repo(&repo, &repo));
        assert!(source_in_repo(&inbox, &repo));
        assert!(!source_in_repo(&outside, &repo));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("missing.toml");
        let args: Vec<OsString> = vec![
            "file4you".into(),
            "--config".into(),
            missing.into_os_string(),
            "index".into(),
            temp_dir.path().as_os_str().to_owned(),
        ];
        let cli = Cli::try_parse_from(args).unwrap();

        let err = run_cli(cli).unwrap_err();
        assert!(err.contains("Error loading configuration"));
    }
}
