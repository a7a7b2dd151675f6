use crate::{
    error::{Error, Result},
    mode::RunMode,
    pipeline::{FileOutcome, FileStatus},
};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{fs, path::Path, time::Duration};
use tracing::info;

/// Summary of one dispatcher run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Mode that was executed
    pub mode: RunMode,

    /// Template used to render prompts
    pub template: String,

    /// Directory the sources were collected from
    pub source_dir: String,

    /// Directory the outputs were written to
    pub destination_dir: String,

    /// Whether this was a dry run
    pub dry_run: bool,

    /// Number of source files collected
    pub collected: usize,

    /// Number of output files written
    pub written: usize,

    /// Number of files skipped
    pub skipped: usize,

    /// Number of files that failed
    pub failed: usize,

    /// Time spent collecting sources in seconds
    pub collect_secs: f64,

    /// Total run time in seconds
    pub duration_secs: f64,

    /// Per-file outcomes in collection order
    pub files: Vec<FileOutcome>,

    /// Report timestamp
    pub generated_at: DateTime<Local>,
}

impl RunReport {
    /// Builds a report from per-file outcomes.
    #[must_use]
    pub fn new(
        mode: RunMode,
        template: impl Into<String>,
        source_dir: &Path,
        destination_dir: &Path,
        dry_run: bool,
        files: Vec<FileOutcome>,
        collect_duration: Duration,
        duration: Duration,
    ) -> Self {
        let count = |pred: fn(&FileStatus) -> bool| files.iter().filter(|f| pred(&f.status)).count();

        Self {
            mode,
            template: template.into(),
            source_dir: source_dir.display().to_string(),
            destination_dir: destination_dir.display().to_string(),
            dry_run,
            collected: files.len(),
            written: count(|s| matches!(s, FileStatus::Written { .. })),
            skipped: count(|s| matches!(s, FileStatus::Skipped { .. })),
            failed: count(|s| matches!(s, FileStatus::Failed { .. })),
            collect_secs: collect_duration.as_secs_f64(),
            duration_secs: duration.as_secs_f64(),
            files,
            generated_at: Local::now(),
        }
    }

    /// Returns true if any file failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Message printed when the run finishes.
    #[must_use]
    pub const fn completion_message(&self) -> &'static str {
        self.mode.completion_message()
    }

    /// Writes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or serialized.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        serde_json::to_writer_pretty(file, self).map_err(Error::from)?;

        info!("Wrote run report to {}", path.display());
        Ok(())
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║                  Run Summary                          ║");
        println!("╠═══════════════════════════════════════════════════════╣");
        println!("║ Mode:                 {:>12}                    ║", self.mode.id());
        println!("║ Files Collected:      {:>8}                        ║", self.collected);
        if self.dry_run {
            println!("║   - Rendered:         {:>8}                        ║", self.collected - self.failed);
        } else {
            println!("║   - Written:          {:>8}                        ║", self.written);
            println!("║   - Skipped:          {:>8}                        ║", self.skipped);
        }
        println!("║   - Failed:           {:>8}                        ║", self.failed);
        println!("║                                                       ║");
        println!("║ Output Directory:                                     ║");
        println!("║   {}", self.destination_dir);
        println!("║                                                       ║");
        println!("║ Timing:                                               ║");
        println!("║   - Collecting:       {:>8.2}s                     ║", self.collect_secs);
        println!("║   - Total:            {:>8.2}s                     ║", self.duration_secs);
        if self.dry_run {
            println!("║                                                       ║");
            println!("║ ⚠ No completions requested (dry run mode)            ║");
        }
        println!("╚═══════════════════════════════════════════════════════╝\n");

        for file in &self.files {
            if let FileStatus::Failed { stage, error } = &file.status {
                println!("  ✗ {} [{}]: {}", file.source.display(), stage, error);
            }
        }
    }
}
