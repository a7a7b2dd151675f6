use crate::{
    error::{Error, Result},
    file::SourceFile,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Lists source files in a single directory.
///
/// Only direct children are considered. A file is kept when its name ends
/// with the configured suffix (exact, case-sensitive) and does not match
/// any exclude pattern. Results are sorted by file name.
#[derive(Debug, Clone)]
pub struct FileCollector {
    suffix: String,
    exclude: GlobSet,
}

impl FileCollector {
    /// Creates a collector for files ending in `suffix`.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclude pattern is not a valid glob.
    pub fn new(suffix: impl Into<String>, exclude_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            suffix: suffix.into(),
            exclude: Self::build_globset(exclude_patterns)?,
        })
    }

    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::config(format!("Invalid exclude pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }

        builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build exclude set: {e}")))
    }

    /// Suffix that file names must end with.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns true if a file named `name` should be collected.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        name.ends_with(&self.suffix) && !self.exclude.is_match(name)
    }

    /// Collects and reads every matching file in `source_dir`.
    ///
    /// An empty result is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryNotFound`] if `source_dir` is missing, not a
    /// directory or cannot be listed, and [`Error::Read`] if a matching file
    /// cannot be read.
    pub fn collect(&self, source_dir: &Path) -> Result<Vec<SourceFile>> {
        if !source_dir.is_dir() {
            return Err(Error::directory_not_found(source_dir));
        }

        debug!(
            "Collecting '*{}' files from {}",
            self.suffix,
            source_dir.display()
        );

        let walker = WalkDir::new(source_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        let mut files = Vec::new();
        let mut skipped = 0usize;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    warn!("Cannot list {}: {}", source_dir.display(), e);
                    return Err(Error::directory_not_found(source_dir));
                }
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !self.matches(&name) {
                trace!("Ignoring {}", name);
                skipped += 1;
                continue;
            }

            files.push(SourceFile::read(entry.path())?);
        }

        debug!(
            "Collected {} files ({} ignored) from {}",
            files.len(),
            skipped,
            source_dir.display()
        );
        Ok(files)
    }
}
