//! Wrapper around the `git` command line.
//!
//! Every invocation runs as `git -C <repo> ...` with a timeout and captures
//! stdout and stderr together. Operations on the same repository are
//! serialized through a per-repository lock; different repositories run in
//! parallel. Output is parsed only for the few signatures listed below, so git
//! runs with `LC_ALL=C` to keep them stable.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{Span, debug, info, info_span, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message attached to stashes created before an organize run.
pub const AUTO_STASH_MESSAGE: &str = "file4you: auto-stash before organizing";

const POP_STASH_CONFLICT_MSG: &str = "overwritten by merge";
const CONFLICT_MSG_FILES_END: &str = "commit your changes";
const CHECKOUT_CONFLICT_MSG: &str = "would be overwritten";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: io::Error,
    },

    #[error("git {args} timed out after {timeout:?}")]
    TimedOut { args: String, timeout: Duration },

    #[error("git {args} failed ({status}): {output}")]
    CommandFailed {
        args: String,
        status: ExitStatus,
        output: String,
    },

    #[error("conflict popping stash in {} files: {}", files.len(), files.join(", "))]
    StashConflict { files: Vec<String>, output: String },

    #[error("checkout of {target} refused, local changes would be overwritten: {output}")]
    CheckoutConflict { target: String, output: String },

    #[error("invalid rewind target '{target}': {reason}")]
    InvalidRewindTarget { target: String, reason: String },

    #[error("commit {0} not found in history")]
    CommitNotFound(String),
}

pub type GitResult<T> = Result<T, GitError>;

/// Map from canonical repository path to that repository's lock.
#[derive(Debug, Default)]
struct RepoLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    fn lock_for(&self, repo: &Path) -> Arc<Mutex<()>> {
        let key = fs::canonicalize(repo).unwrap_or_else(|_| repo.to_path_buf());
        self.locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Runs git commands against local repositories.
#[derive(Debug)]
pub struct GitClient {
    program: PathBuf,
    timeout: Duration,
    locks: RepoLocks,
    span: Span,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitClient {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout: DEFAULT_GIT_TIMEOUT,
            locks: RepoLocks::default(),
            span: info_span!("git"),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses a different executable in place of `git` on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns true if `git --version` runs successfully.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Runs one git command without taking the repository lock.
    fn run_raw(&self, repo: &Path, args: &[&str]) -> GitResult<(ExitStatus, String)> {
        let rendered = args.join(" ");
        debug!(repo = %repo.display(), args = %rendered, "running git");

        let mut child = Command::new(&self.program)
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Spawn {
                args: rendered.clone(),
                source,
            })?;

        // Drain both pipes while waiting so a chatty command cannot block.
        let stdout = child.stdout.take().map(|pipe| thread::spawn(move || drain(pipe)));
        let stderr = child.stderr.take().map(|pipe| thread::spawn(move || drain(pipe)));

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                warn!(repo = %repo.display(), args = %rendered, "git command timed out");
                return Err(GitError::TimedOut {
                    args: rendered,
                    timeout: self.timeout,
                });
            }
            Err(source) => {
                return Err(GitError::Spawn {
                    args: rendered,
                    source,
                });
            }
        };

        let mut output = String::new();
        for reader in [stdout, stderr].into_iter().flatten() {
            output.push_str(&reader.join().unwrap_or_default());
        }
        Ok((status, output))
    }

    /// Runs one git command without the lock, failing on a non-zero exit.
    fn run(&self, repo: &Path, args: &[&str]) -> GitResult<String> {
        let (status, output) = self.run_raw(repo, args)?;
        if !status.success() {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                status,
                output: output.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Initializes a repository unless `<dir>/.git` already exists.
    ///
    /// # Arguments
    ///
    /// * `dir` - An existing directory to turn into a repository
    ///
    /// # Returns
    ///
    /// True if a repository was created, false if one was already there.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::git::GitClient;
    /// use std::path::Path;
    ///
    /// let git = GitClient::new();
    /// if git.init_repo(Path::new("Sorted")).unwrap() {
    ///     println!("created a repository");
    /// }
    /// ```
    pub fn init_repo(&self, dir: &Path) -> GitResult<bool> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();

        if dir.join(".git").exists() {
            debug!(repo = %dir.display(), "repository already initialized");
            return Ok(false);
        }
        self.run(dir, &["init"])?;
        info!(repo = %dir.display(), "initialized git repository");
        Ok(true)
    }

    /// Returns true if `dir` is inside a git work tree.
    pub fn is_repo(&self, dir: &Path) -> bool {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        self.run(dir, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// Top-level directory of the work tree containing `dir`.
    pub fn repo_root(&self, dir: &Path) -> GitResult<PathBuf> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        let output = self.run(dir, &["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(output.trim()))
    }

    /// Stages everything and commits, even if nothing changed.
    ///
    /// # Arguments
    ///
    /// * `dir` - Any directory inside the repository
    /// * `message` - The commit message
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::git::GitClient;
    /// use std::path::Path;
    ///
    /// GitClient::new()
    ///     .add_and_commit(Path::new("Sorted"), "organized downloads")
    ///     .unwrap();
    /// ```
    pub fn add_and_commit(&self, dir: &Path, message: &str) -> GitResult<()> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();

        self.run(dir, &["add", "."])?;
        self.run(dir, &["commit", "-m", message, "--allow-empty"])?;
        info!(repo = %dir.display(), message, "committed changes");
        Ok(())
    }

    pub fn has_uncommitted_changes(&self, dir: &Path) -> GitResult<bool> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        let status = self.run(dir, &["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    pub fn file_has_uncommitted_changes(&self, dir: &Path, file: &Path) -> GitResult<bool> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        let file = file.to_string_lossy();
        let status = self.run(dir, &["status", "--porcelain", "--", &file])?;
        Ok(!status.trim().is_empty())
    }

    /// Stashes tracked and untracked changes under `message`.
    ///
    /// # Arguments
    ///
    /// * `dir` - Any directory inside the repository
    /// * `message` - Stash message; [`AUTO_STASH_MESSAGE`] marks stashes the
    ///   organizer pops on its own
    pub fn stash_create(&self, dir: &Path, message: &str) -> GitResult<()> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        self.run(dir, &["stash", "push", "--include-untracked", "-m", message])?;
        info!(repo = %dir.display(), message, "stashed uncommitted changes");
        Ok(())
    }

    /// Pops the latest stash.
    ///
    /// If the pop is refused because local changes would be overwritten, a
    /// forced pop checks out each conflicting file and pops again, so the
    /// stashed version wins. Without `force` the stash is left in place and
    /// [`GitError::StashConflict`] names the files.
    ///
    /// # Arguments
    ///
    /// * `dir` - Any directory inside the repository
    /// * `force` - Discard local versions of conflicting files
    pub fn stash_pop(&self, dir: &Path, force: bool) -> GitResult<()> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();

        let (status, output) = self.run_raw(dir, &["stash", "pop"])?;
        if status.success() {
            info!(repo = %dir.display(), "popped stash");
            return Ok(());
        }
        if !output.contains(POP_STASH_CONFLICT_MSG) {
            return Err(GitError::CommandFailed {
                args: "stash pop".to_string(),
                status,
                output: output.trim().to_string(),
            });
        }

        let files = parse_conflict_files(&output);
        warn!(repo = %dir.display(), conflicts = files.len(), force, "stash pop hit conflicts");
        if !force {
            return Err(GitError::StashConflict { files, output });
        }

        for file in &files {
            self.run(dir, &["checkout", "--", file])?;
        }
        let (status, retry_output) = self.run_raw(dir, &["stash", "pop"])?;
        if !status.success() {
            return Err(GitError::StashConflict {
                files,
                output: retry_output,
            });
        }
        info!(repo = %dir.display(), "force-popped stash");
        Ok(())
    }

    /// Whether the stash list holds an entry made with [`AUTO_STASH_MESSAGE`].
    pub fn has_auto_stash(&self, dir: &Path) -> GitResult<bool> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        let list = self.run(dir, &["stash", "list"])?;
        Ok(list.lines().any(|line| line.contains(AUTO_STASH_MESSAGE)))
    }

    /// Discards every uncommitted change, untracked files included.
    pub fn clear_uncommitted_changes(&self, dir: &Path) -> GitResult<()> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        self.run(dir, &["reset", "--hard"])?;
        self.run(dir, &["clean", "-d", "-f"])?;
        info!(repo = %dir.display(), "cleared uncommitted changes");
        Ok(())
    }

    pub fn checkout_file(&self, dir: &Path, file: &str) -> GitResult<()> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        self.run(dir, &["checkout", "--", file])?;
        Ok(())
    }

    /// Every commit id, newest first. Index `n` is the rewind target `n`.
    pub fn commit_history(&self, dir: &Path) -> GitResult<Vec<String>> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();
        self.history(dir)
    }

    fn history(&self, dir: &Path) -> GitResult<Vec<String>> {
        let output = self.run(dir, &["rev-list", "--all"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Checks out a commit given as an id or a step count back from newest.
    ///
    /// # Arguments
    ///
    /// * `dir` - Any directory inside the repository
    /// * `target` - A full 40-character commit id from the history, or a step
    ///   count where `0` is the newest commit
    ///
    /// # Returns
    ///
    /// The commit id that was checked out, leaving HEAD detached.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::git::GitClient;
    /// use std::path::Path;
    ///
    /// // Undo the latest organize run.
    /// let commit = GitClient::new().rewind(Path::new("Sorted"), "1").unwrap();
    /// println!("now at {}", commit);
    /// ```
    pub fn rewind(&self, dir: &Path, target: &str) -> GitResult<String> {
        let _enter = self.span.enter();
        let lock = self.locks.lock_for(dir);
        let _guard = lock.lock();

        let history = self.history(dir)?;
        let commit = resolve_rewind_target(target, &history)?;

        let (status, output) = self.run_raw(dir, &["checkout", &commit])?;
        if !status.success() {
            if output.contains(CHECKOUT_CONFLICT_MSG) {
                return Err(GitError::CheckoutConflict {
                    target: commit,
                    output: output.trim().to_string(),
                });
            }
            return Err(GitError::CommandFailed {
                args: format!("checkout {commit}"),
                status,
                output: output.trim().to_string(),
            });
        }
        info!(repo = %dir.display(), commit = %commit, "rewound repository");
        Ok(commit)
    }
}

fn drain(mut pipe: impl Read) -> String {
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Full 40-character lowercase hexadecimal commit id.
pub fn is_sha(value: &str) -> bool {
    value.len() == 40 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Maps a rewind target onto a commit id from `history` (newest first).
pub fn resolve_rewind_target(target: &str, history: &[String]) -> GitResult<String> {
    let target = target.trim();
    if is_sha(target) {
        return if history.iter().any(|c| c == target) {
            Ok(target.to_string())
        } else {
            Err(GitError::CommitNotFound(target.to_string()))
        };
    }

    let steps: usize = target.parse().map_err(|_| GitError::InvalidRewindTarget {
        target: target.to_string(),
        reason: "expected a commit id or a non-negative step count".to_string(),
    })?;
    history
        .get(steps)
        .cloned()
        .ok_or_else(|| GitError::InvalidRewindTarget {
            target: target.to_string(),
            reason: format!("history has only {} commits", history.len()),
        })
}

/// File names listed between the conflict header and the closing hint.
fn parse_conflict_files(output: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut in_list = false;
    for line in output.lines() {
        if line.contains(POP_STASH_CONFLICT_MSG) {
            in_list = true;
            continue;
        }
        if line.contains(CONFLICT_MSG_FILES_END) {
            if in_list {
                break;
            }
            continue;
        }
        if in_list {
            let name = line.trim();
            if !name.is_empty() {
                files.push(name.to_string());
            }
        }
    }
    files
}
