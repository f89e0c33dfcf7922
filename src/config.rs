//! Application configuration.
//!
//! Configuration is a single TOML document. Every section is optional and falls
//! back to built-in defaults:
//!
//! ```toml
//! target_dir = "/home/me/Sorted"
//!
//! [file_types]
//! Notes = [".md", ".txt"]
//! "Media/Pics" = [".png", ".jpg"]
//!
//! [logging]
//! level = "info"
//! format = "text"
//!
//! [organize]
//! workers = 8
//! conflict_policy = "rename"
//! timeout_secs = 600
//! git_timeout_secs = 30
//!
//! [filters]
//! include_hidden = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["**/node_modules/**"]
//! extensions = ["bak", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```
//!
//! Lookup order: an explicit path, then `.file4you/config.toml` in the working
//! directory, then `$HOME/.config/file4you/config.toml`, then defaults.

use crate::file_category::FileTypeTree;
use crate::logging::LoggingConfig;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const WORKSPACE_CONFIG_DIR: &str = ".file4you";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid glob pattern '{pattern}': {reason}")]
    InvalidGlobPattern { pattern: String, reason: String },

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default destination when `organize` is given no target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<PathBuf>,
    /// Category name (may contain `/`) to the extensions it accepts.
    pub file_types: BTreeMap<String, Vec<String>>,
    pub logging: LoggingConfig,
    pub organize: OrganizeSettings,
    pub filters: FilterRules,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_dir: None,
            file_types: default_file_types(),
            logging: LoggingConfig::default(),
            organize: OrganizeSettings::default(),
            filters: FilterRules::default(),
        }
    }
}

/// Organize engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeSettings {
    /// Worker pool size; unset means one worker per available core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    pub conflict_policy: String,
    pub timeout_secs: u64,
    pub git_timeout_secs: u64,
}

impl Default for OrganizeSettings {
    fn default() -> Self {
        Self {
            workers: None,
            conflict_policy: "rename".to_string(),
            timeout_secs: 600,
            git_timeout_secs: 30,
        }
    }
}

impl OrganizeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

impl AppConfig {
    /// Loads configuration using the standard lookup order.
    ///
    /// # Errors
    ///
    /// Fails if an explicit path is missing, or if the first file found cannot
    /// be read, parsed or validated.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::load_from_locations(explicit, Path::new("."), home.as_deref())
    }

    /// Lookup with the workspace and home directories supplied by the caller.
    pub fn load_from_locations(
        explicit: Option<&Path>,
        workspace: &Path,
        home: Option<&Path>,
    ) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let workspace_config = workspace_config_path(workspace);
        if workspace_config.is_file() {
            return Self::load_from_file(&workspace_config);
        }

        if let Some(global) = home.map(global_config_path) {
            if global.is_file() {
                return Self::load_from_file(&global);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.organize.workers == Some(0) {
            return Err(ConfigError::Invalid("organize.workers must be at least 1".into()));
        }
        if self.organize.timeout_secs == 0 {
            return Err(ConfigError::Invalid("organize.timeout_secs must be positive".into()));
        }
        if self.organize.git_timeout_secs == 0 {
            return Err(ConfigError::Invalid("organize.git_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn file_type_tree(&self) -> FileTypeTree {
        FileTypeTree::from_mapping(&self.file_types)
    }

    pub fn compile_filters(&self) -> ConfigResult<EntryFilter> {
        EntryFilter::compile(&self.filters)
    }
}

pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

pub fn global_config_path(home: &Path) -> PathBuf {
    home.join(".config").join("file4you").join(CONFIG_FILE_NAME)
}

/// The built-in category mapping.
pub fn default_file_types() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("Notes", &[".md", ".rtf", ".txt"]),
        ("Docs", &[".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx"]),
        ("EXE", &[".exe", ".appimage", ".msi"]),
        ("Vids", &[".mp4", ".mov", ".avi", ".mkv"]),
        ("Compressed", &[".zip", ".rar", ".tar", ".gz", ".7z"]),
        ("Scripts", &[".sh", ".bat"]),
        ("Installers", &[".deb", ".rpm"]),
        ("Books", &[".epub", ".mobi"]),
        ("Music", &[".mp3", ".wav", ".ogg", ".flac"]),
        ("PDFS", &[".pdf"]),
        ("Pics", &[".bmp", ".gif", ".jpg", ".jpeg", ".svg", ".png"]),
        ("Torrents", &[".torrent"]),
        (
            "CODE",
            &[
                ".c", ".h", ".py", ".rs", ".go", ".js", ".ts", ".jsx", ".tsx", ".html", ".css",
                ".php", ".java", ".cpp", ".cs", ".vb", ".sql", ".pl", ".swift", ".kt", ".r",
                ".m", ".asm",
            ],
        ),
        (
            "Markup",
            &[".json", ".xml", ".yml", ".yaml", ".ini", ".toml", ".cfg", ".conf", ".log"],
        ),
    ];

    table
        .iter()
        .map(|(name, exts)| {
            (
                (*name).to_string(),
                exts.iter().map(|e| (*e).to_string()).collect(),
            )
        })
        .collect()
}

/// Exclusion rules applied while building the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    /// Keep entries whose name starts with `.`.
    pub include_hidden: bool,
    pub exclude: ExcludeRules,
    pub include: IncludeRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeRules {
    pub filenames: Vec<String>,
    pub patterns: Vec<String>,
    /// Extensions without the dot, matched case-insensitively.
    pub extensions: Vec<String>,
    pub regex: Vec<String>,
}

/// Glob patterns that win over every exclusion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeRules {
    pub patterns: Vec<String>,
}

/// [`FilterRules`] with every pattern compiled.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    include_hidden: bool,
    names: HashSet<String>,
    extensions: HashSet<String>,
    globs: Vec<Pattern>,
    regexes: Vec<Regex>,
    keep: Vec<Pattern>,
}

impl EntryFilter {
    pub fn compile(rules: &FilterRules) -> ConfigResult<Self> {
        Ok(Self {
            include_hidden: rules.include_hidden,
            names: rules.exclude.filenames.iter().cloned().collect(),
            extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            globs: compile_globs(&rules.exclude.patterns)?,
            regexes: rules
                .exclude
                .regex
                .iter()
                .map(|pattern| {
                    Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
            keep: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Decides whether an entry stays in the tree.
    ///
    /// `relative` is the entry's path relative to the scanned root. Include
    /// patterns are checked first and win; otherwise the entry is dropped if it
    /// is hidden (unless hidden entries are enabled), or matches an excluded
    /// name, extension, glob or regex. Regexes match the file name only.
    pub fn allows(&self, relative: &Path) -> bool {
        if self.keep.iter().any(|p| p.matches_path(relative)) {
            return true;
        }

        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if !self.include_hidden && name.starts_with('.') {
            return false;
        }
        if self.names.contains(name.as_ref()) {
            return false;
        }
        let excluded_ext = relative
            .extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false);
        if excluded_ext {
            return false;
        }
        if self.globs.iter().any(|p| p.matches_path(relative)) {
            return false;
        }
        !self.regexes.iter().any(|r| r.is_match(&name))
    }
}

fn compile_globs(patterns: &[String]) -> ConfigResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|e| ConfigError::InvalidGlobPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
