//! file4you - organize files into category folders
//!
//! This library builds an in-memory model of a directory tree, moves every
//! file into the category folder its extension maps to using a bounded worker
//! pool, and can wrap each run in a git commit so it can be rewound later. A
//! k-d tree over directory metadata answers nearest and range queries.

pub mod builder;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod file_category;
pub mod file_ops;
pub mod file_organizer;
pub mod git;
pub mod logging;
pub mod metadata;
pub mod output;
pub mod spatial;
pub mod tree;

pub use builder::{BuildError, TreeBuilder};
pub use config::{AppConfig, ConfigError};
pub use file_category::FileTypeTree;
pub use file_organizer::{ConflictPolicy, OrganizeError, OrganizeParams, OrganizeReport, Organizer};
pub use git::{GitClient, GitError};
pub use tree::DirectoryTree;

pub use cli::{Cli, run_cli};
