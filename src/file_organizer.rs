//! The organize engine: moves every file in a [`DirectoryTree`] into the
//! category folder its extension maps to.
//!
//! Files are dispatched one task each onto a bounded rayon pool while the
//! calling thread walks the tree depth-first. Tasks share a
//! [`CancellationToken`]; the first failure is kept, cancels the token, and is
//! returned once every task has been joined. Later failures are only counted.
//! Nothing already moved is rolled back.

use crate::cancel::CancellationToken;
use crate::file_category::FileTypeTree;
use crate::file_ops::{self, FileOps, MoveOutcome, StdFileOps};
use crate::git::{GitClient, GitError};
use crate::tree::{DirectoryTree, FileNode, NodeId};
use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{Span, debug, error, info, info_span, warn};

/// Hard limit for one organize run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Errors that end an organize run.
#[derive(Debug, thiserror::Error)]
pub enum OrganizeError {
    #[error("invalid organize parameters: {0}")]
    Validation(String),

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to place {} at {}: {source}", path.display(), destination.display())]
    FileOperation {
        path: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("organize run was cancelled")]
    Cancelled,

    #[error("organize run exceeded its {0:?} limit")]
    TimedOut(Duration),

    #[error("failed to commit organized files: {0}")]
    GitCommit(#[source] GitError),

    #[error("failed to restore stashed changes after organizing: {0}")]
    GitStashPop(#[source] GitError),
}

/// Result type for organize operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// What to do when a file's destination already exists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    Overwrite,
    Skip,
    #[default]
    Rename,
    /// A policy name this version does not know; treated as `Skip`.
    Unrecognized(String),
}

impl ConflictPolicy {
    /// Parses a policy name, keeping unknown names as [`ConflictPolicy::Unrecognized`].
    ///
    /// # Example
    ///
    /// ```
    /// use file4you::file_organizer::ConflictPolicy;
    ///
    /// assert_eq!(ConflictPolicy::parse("Skip"), ConflictPolicy::Skip);
    /// assert_eq!(ConflictPolicy::parse("merge").to_string(), "merge");
    /// ```
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "overwrite" => ConflictPolicy::Overwrite,
            "skip" => ConflictPolicy::Skip,
            "rename" => ConflictPolicy::Rename,
            _ => ConflictPolicy::Unrecognized(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Unrecognized(other) => other,
        }
    }
}

impl From<&str> for ConflictPolicy {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for one organize run.
#[derive(Debug, Clone)]
pub struct OrganizeParams {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub recursive: bool,
    /// Copy instead of moving.
    pub copy_files: bool,
    /// In copy mode, delete each source after it was copied.
    pub remove_after: bool,
    /// Log and count actions without touching the filesystem or git.
    pub dry_run: bool,
    pub conflict_policy: ConflictPolicy,
    pub git_enabled: bool,
    /// Builder depth limit; `None` measures the source tree first.
    pub max_depth: Option<usize>,
}

impl OrganizeParams {
    pub fn new(source_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            recursive: true,
            copy_files: false,
            remove_after: false,
            dry_run: false,
            conflict_policy: ConflictPolicy::default(),
            git_enabled: false,
            max_depth: None,
        }
    }

    pub fn validate(&self) -> OrganizeResult<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(OrganizeError::Validation(
                "source directory cannot be empty".to_string(),
            ));
        }
        if self.target_dir.as_os_str().is_empty() {
            return Err(OrganizeError::Validation(
                "target directory cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a single file was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Moved,
    Copied,
    /// Dry run: the move or copy that would have happened.
    Planned,
}

/// A file placed (or planned to be placed) in its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub category: String,
    pub kind: OperationKind,
}

/// Per-outcome counts for a finished run.
///
/// `renamed` and `overwritten` count conflict resolutions; the files involved
/// are also counted as moved, copied or planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeReport {
    pub moved: usize,
    pub copied: usize,
    pub renamed: usize,
    pub overwritten: usize,
    pub skipped_conflicts: usize,
    pub unmapped: usize,
    pub already_in_place: usize,
    pub planned: usize,
    /// Moves that fell back to copy plus delete.
    pub cross_device: usize,
    pub categories: BTreeMap<String, usize>,
    /// Every placement, ordered by original path.
    pub operations: Vec<Operation>,
}

impl OrganizeReport {
    /// Files moved, copied or planned.
    pub fn placed(&self) -> usize {
        self.moved + self.copied + self.planned
    }
}

#[derive(Debug, Default)]
struct Counters {
    moved: AtomicUsize,
    copied: AtomicUsize,
    renamed: AtomicUsize,
    overwritten: AtomicUsize,
    skipped_conflicts: AtomicUsize,
    unmapped: AtomicUsize,
    already_in_place: AtomicUsize,
    planned: AtomicUsize,
    cross_device: AtomicUsize,
    categories: Mutex<BTreeMap<String, usize>>,
    operations: Mutex<Vec<Operation>>,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, operation: Operation) {
        *self
            .categories
            .lock()
            .entry(operation.category.clone())
            .or_insert(0) += 1;
        self.operations.lock().push(operation);
    }

    fn into_report(self) -> OrganizeReport {
        let mut operations = self.operations.into_inner();
        operations.sort_by(|a, b| a.original_path.cmp(&b.original_path));
        OrganizeReport {
            moved: self.moved.into_inner(),
            copied: self.copied.into_inner(),
            renamed: self.renamed.into_inner(),
            overwritten: self.overwritten.into_inner(),
            skipped_conflicts: self.skipped_conflicts.into_inner(),
            unmapped: self.unmapped.into_inner(),
            already_in_place: self.already_in_place.into_inner(),
            planned: self.planned.into_inner(),
            cross_device: self.cross_device.into_inner(),
            categories: self.categories.into_inner(),
            operations,
        }
    }
}

/// Holds the first task error; recording any error cancels the run.
struct ErrorGroup {
    first: Mutex<Option<OrganizeError>>,
    discarded: AtomicUsize,
    token: CancellationToken,
}

impl ErrorGroup {
    fn new(token: CancellationToken) -> Self {
        Self {
            first: Mutex::new(None),
            discarded: AtomicUsize::new(0),
            token,
        }
    }

    fn record(&self, err: OrganizeError) {
        {
            let mut first = self.first.lock();
            if first.is_none() {
                *first = Some(err);
            } else {
                debug!(error = %err, "discarding error after the first");
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.token.cancel();
    }

    fn take(&self) -> Option<OrganizeError> {
        self.first.lock().take()
    }
}

enum Resolution {
    Overwrote,
    Renamed,
}

/// State shared by every task of one run.
struct Run<'a> {
    tree: &'a DirectoryTree,
    mapping: &'a FileTypeTree,
    params: &'a OrganizeParams,
    token: &'a CancellationToken,
    file_ops: &'a dyn FileOps,
    progress: Option<&'a ProgressBar>,
    span: &'a Span,
    counters: Counters,
    errors: ErrorGroup,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl<'a> Run<'a> {
    fn dispatch<'s>(&'s self, scope: &rayon::Scope<'s>, id: NodeId)
    where
        'a: 's,
    {
        let tree: &'a DirectoryTree = self.tree;
        let node = tree.node(id);
        for file in node.files() {
            scope.spawn(move |_| self.run_task(file));
        }
        if self.params.recursive {
            for &child in node.children() {
                self.dispatch(scope, child);
            }
        }
    }

    fn run_task(&self, file: &FileNode) {
        self.span.in_scope(|| {
            let outcome = self.place(file);
            if let Some(progress) = self.progress {
                progress.inc(1);
            }
            if let Err(err) = outcome {
                error!(file = %file.path.display(), error = %err, "failed to organize file");
                self.errors.record(err);
            }
        });
    }

    fn place(&self, file: &FileNode) -> OrganizeResult<()> {
        if self.token.is_cancelled() {
            debug!(file = %file.path.display(), "run cancelled, skipping");
            return Ok(());
        }

        let Some(category) = self.mapping.destination_for(&file.extension) else {
            warn!(
                file = %file.path.display(),
                extension = %file.extension,
                "no category for extension, skipping"
            );
            Counters::bump(&self.counters.unmapped);
            return Ok(());
        };

        let dest_dir = self.params.target_dir.join(&category);
        if self.params.dry_run {
            debug!(dir = %dest_dir.display(), "dry run: would ensure directory");
        } else {
            fs::create_dir_all(&dest_dir).map_err(|source| OrganizeError::CreateDir {
                path: dest_dir.clone(),
                source,
            })?;
        }

        let candidate = dest_dir.join(&file.name);
        let Some((destination, resolution)) = self.claim_destination(file, candidate) else {
            return Ok(());
        };

        let category = category.to_string_lossy().into_owned();
        let kind = if self.params.dry_run {
            info!(
                from = %file.path.display(),
                to = %destination.display(),
                copy = self.params.copy_files,
                "dry run: would place file"
            );
            Counters::bump(&self.counters.planned);
            OperationKind::Planned
        } else if self.params.copy_files {
            file_ops::copy_file(&file.path, &destination, self.params.remove_after)
                .map_err(|source| file_error(file, &destination, source))?;
            Counters::bump(&self.counters.copied);
            OperationKind::Copied
        } else {
            let outcome = file_ops::move_path(self.file_ops, &file.path, &destination)
                .map_err(|source| file_error(file, &destination, source))?;
            if outcome == MoveOutcome::CopiedAcrossDevices {
                Counters::bump(&self.counters.cross_device);
            }
            Counters::bump(&self.counters.moved);
            OperationKind::Moved
        };

        match resolution {
            Some(Resolution::Overwrote) => Counters::bump(&self.counters.overwritten),
            Some(Resolution::Renamed) => Counters::bump(&self.counters.renamed),
            None => {}
        }
        debug!(from = %file.path.display(), to = %destination.display(), "placed file");
        self.counters.record(Operation {
            original_path: file.path.clone(),
            new_path: destination,
            category,
            kind,
        });
        Ok(())
    }

    /// Applies the conflict policy and reserves the final destination.
    ///
    /// Destinations claimed by other tasks of this run count as occupied, so two
    /// files with the same name never race for one path. `Overwrite` only
    /// replaces files that existed before the run; a destination this run
    /// already placed a file at gets a numbered name instead. Returns `None`
    /// when the file should be left where it is.
    fn claim_destination(
        &self,
        file: &FileNode,
        candidate: PathBuf,
    ) -> Option<(PathBuf, Option<Resolution>)> {
        let mut claimed = self.claimed.lock();

        if candidate.exists() && same_location(&candidate, &file.path) {
            debug!(file = %file.path.display(), "already in place");
            Counters::bump(&self.counters.already_in_place);
            return None;
        }

        let occupied = |path: &Path| claimed.contains(path) || path.exists();
        let (destination, resolution) = if !occupied(&candidate) {
            (candidate, None)
        } else {
            match &self.params.conflict_policy {
                ConflictPolicy::Overwrite if !claimed.contains(&candidate) => {
                    info!(dest = %candidate.display(), "destination exists, overwriting");
                    (candidate, Some(Resolution::Overwrote))
                }
                ConflictPolicy::Overwrite | ConflictPolicy::Rename => {
                    let renamed = file_ops::unique_destination(&candidate, &occupied);
                    info!(
                        dest = %candidate.display(),
                        renamed = %renamed.display(),
                        "destination exists, renaming"
                    );
                    (renamed, Some(Resolution::Renamed))
                }
                ConflictPolicy::Skip => {
                    info!(file = %file.path.display(), dest = %candidate.display(), "destination exists, skipping");
                    Counters::bump(&self.counters.skipped_conflicts);
                    return None;
                }
                ConflictPolicy::Unrecognized(policy) => {
                    warn!(policy = %policy, file = %file.path.display(), "unknown conflict policy, skipping");
                    Counters::bump(&self.counters.skipped_conflicts);
                    return None;
                }
            }
        };

        claimed.insert(destination.clone());
        Some((destination, resolution))
    }
}

fn file_error(file: &FileNode, destination: &Path, source: io::Error) -> OrganizeError {
    OrganizeError::FileOperation {
        path: file.path.clone(),
        destination: destination.to_path_buf(),
        source,
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Runs organize passes over directory trees.
pub struct Organizer {
    workers: usize,
    timeout: Duration,
    file_ops: Arc<dyn FileOps>,
    git: Arc<GitClient>,
    progress: Option<ProgressBar>,
    span: Span,
}

impl Default for Organizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Organizer {
    pub fn new() -> Self {
        Self {
            workers: default_workers(),
            timeout: DEFAULT_TIMEOUT,
            file_ops: Arc::new(StdFileOps),
            git: Arc::new(GitClient::new()),
            progress: None,
            span: info_span!("organizer"),
        }
    }

    /// Sets the worker pool size (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = file_ops;
        self
    }

    pub fn with_git(mut self, git: Arc<GitClient>) -> Self {
        self.git = git;
        self
    }

    /// Advances `progress` once per file task, including skipped files.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Organizes every file in `tree` into `params.target_dir`.
    ///
    /// # Arguments
    ///
    /// * `tree` - The source tree, read-only for the whole run
    /// * `mapping` - Category-mapping tree resolving each file's folder
    /// * `params` - Run parameters, validated before anything happens
    ///
    /// # Errors
    ///
    /// Returns the first file-operation failure, [`OrganizeError::TimedOut`]
    /// if the run outlived its limit, or a git error if committing the result
    /// failed. Files placed before a failure stay where they are.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use file4you::builder::TreeBuilder;
    /// use file4you::config::AppConfig;
    /// use file4you::file_organizer::{OrganizeParams, Organizer};
    /// use std::path::Path;
    ///
    /// let config = AppConfig::default();
    /// let tree = TreeBuilder::new().build_full(Path::new("Downloads"), true).unwrap();
    /// let params = OrganizeParams::new("Downloads", "Sorted");
    ///
    /// let report = Organizer::new()
    ///     .organize(&tree, &config.file_type_tree(), &params)
    ///     .unwrap();
    /// println!("moved {} files", report.moved);
    /// ```
    pub fn organize(
        &self,
        tree: &DirectoryTree,
        mapping: &FileTypeTree,
        params: &OrganizeParams,
    ) -> OrganizeResult<OrganizeReport> {
        let token = CancellationToken::with_timeout(self.timeout);
        self.organize_with_token(tree, mapping, params, &token)
    }

    /// Like [`Organizer::organize`], with a caller-owned cancellation token.
    ///
    /// # Arguments
    ///
    /// * `token` - Checked by every task before it touches the filesystem;
    ///   cancelling it from another thread stops tasks that have not started
    pub fn organize_with_token(
        &self,
        tree: &DirectoryTree,
        mapping: &FileTypeTree,
        params: &OrganizeParams,
        token: &CancellationToken,
    ) -> OrganizeResult<OrganizeReport> {
        let _enter = self.span.enter();
        params.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("file4you-organize-{i}"))
            .build()?;

        let run = Run {
            tree,
            mapping,
            params,
            token,
            file_ops: self.file_ops.as_ref(),
            progress: self.progress.as_ref(),
            span: &self.span,
            counters: Counters::default(),
            errors: ErrorGroup::new(token.clone()),
            claimed: Mutex::new(HashSet::new()),
        };

        info!(
            source = %params.source_dir.display(),
            target = %params.target_dir.display(),
            files = tree.file_count(),
            workers = self.workers,
            dry_run = params.dry_run,
            "organizing"
        );
        pool.scope(|scope| run.dispatch(scope, tree.root()));
        tree.record_operation("organize");

        let discarded = run.errors.discarded.load(Ordering::Relaxed);
        if discarded > 0 {
            warn!(discarded, "additional errors after the first were discarded");
        }
        if let Some(err) = run.errors.take() {
            return Err(err);
        }
        if token.timed_out() {
            return Err(OrganizeError::TimedOut(self.timeout));
        }
        if token.was_cancelled() {
            return Err(OrganizeError::Cancelled);
        }

        let report = run.counters.into_report();
        info!(
            moved = report.moved,
            copied = report.copied,
            planned = report.planned,
            unmapped = report.unmapped,
            skipped = report.skipped_conflicts,
            "organize finished"
        );

        if params.git_enabled && !params.dry_run {
            self.commit_result(params)?;
        }
        Ok(report)
    }

    /// Commits the target directory and restores any auto-stash.
    fn commit_result(&self, params: &OrganizeParams) -> OrganizeResult<()> {
        let repo = &params.target_dir;
        // A run that placed nothing never created the target.
        fs::create_dir_all(repo).map_err(|source| OrganizeError::CreateDir {
            path: repo.clone(),
            source,
        })?;
        self.git.init_repo(repo).map_err(OrganizeError::GitCommit)?;
        let message = format!(
            "file4you: organized {} into {}",
            params.source_dir.display(),
            params.target_dir.display()
        );
        self.git
            .add_and_commit(repo, &message)
            .map_err(OrganizeError::GitCommit)?;

        if self.git.has_auto_stash(repo).map_err(OrganizeError::GitStashPop)? {
            self.git.stash_pop(repo, true).map_err(OrganizeError::GitStashPop)?;
        }
        Ok(())
    }
}
