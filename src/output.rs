//! User-facing terminal output.
//!
//! Everything the CLI prints for people goes through [`OutputFormatter`].
//! Diagnostics are logged with `tracing` instead and never printed here.

use crate::file_organizer::OrganizeReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;

const PROGRESS_TEMPLATE: &str = "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Prints styled messages, progress bars and summary tables.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::output::OutputFormatter;
    /// OutputFormatter::success("Files organized");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red to stderr.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::output::OutputFormatter;
    /// OutputFormatter::error("Failed to organize Downloads");
    /// ```
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    ///
    /// # Arguments
    ///
    /// * `message` - The message to display
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::output::OutputFormatter;
    /// OutputFormatter::info("Organizing Downloads into Sorted");
    /// ```
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a bold section header after a blank line.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints `message` prefixed with `[DRY RUN]` in yellow.
    ///
    /// # Arguments
    ///
    /// * `message` - The dry-run message
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` file tasks.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("done");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        let pb = ProgressBar::new(total);
        pb.set_style(style);
        pb
    }

    /// Prints per-category counts with a total row.
    ///
    /// # Arguments
    ///
    /// * `category_counts` - Category path to number of files placed there
    /// * `total_files` - Total shown in the footer row
    ///
    /// # Example
    ///
    /// ```no_run
    /// use file4you::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Docs".to_string(), 15);
    /// counts.insert("Media/Pics".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(8);

        println!("{:<width$} | {}", "Category".bold(), "Files".bold());
        println!("{}", "-".repeat(width + 10));
        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count)
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files)
        );
    }

    /// Prints the outcome of an organize run.
    ///
    /// # Arguments
    ///
    /// * `report` - The report returned by the organizer
    /// * `dry_run` - Also list every planned placement
    pub fn organize_report(report: &OrganizeReport, dry_run: bool) {
        if dry_run {
            Self::header("DRY RUN: files would be organized as follows");
            for op in &report.operations {
                println!(
                    " - {} {} {}/",
                    op.original_path.display(),
                    "→".cyan(),
                    op.category
                );
            }
        }

        Self::summary_table(&report.categories, report.placed());

        let notes = [
            (report.renamed, "renamed to avoid a conflict"),
            (report.overwritten, "overwrote an existing file"),
            (report.skipped_conflicts, "skipped because the destination exists"),
            (report.unmapped, "had no matching category"),
            (report.already_in_place, "already in place"),
            (report.cross_device, "copied across filesystems"),
        ];
        for (count, note) in notes {
            if count > 0 {
                println!("  {} {} {}", count.to_string().yellow(), plural(count), note);
            }
        }

        if dry_run {
            Self::dry_run_notice("No files were modified.");
        } else {
            Self::success("Organization complete!");
        }
    }

    /// Prints a numbered list of paths, nearest first.
    ///
    /// # Arguments
    ///
    /// * `title` - Header printed above the list
    /// * `paths` - Paths in display order
    pub fn path_list<'a>(title: &str, paths: impl IntoIterator<Item = &'a Path>) {
        Self::header(title);
        let mut empty = true;
        for (i, path) in paths.into_iter().enumerate() {
            println!("{:>3}. {}", i + 1, path.display());
            empty = false;
        }
        if empty {
            Self::plain("  (none)");
        }
    }

    /// Prints commit ids, newest first.
    ///
    /// # Arguments
    ///
    /// * `commits` - Commit ids as returned by `GitClient::commit_history`
    pub fn history(commits: &[String]) {
        Self::header("HISTORY");
        if commits.is_empty() {
            Self::plain("  no commits yet");
            return;
        }
        for (i, commit) in commits.iter().enumerate() {
            let marker = if i == 0 { "HEAD".green().bold() } else { format!("~{i}").normal() };
            println!("  {} {}", commit.yellow(), marker);
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}
