use crate::{
    config::OverwritePolicy,
    error::{Error, Result},
    pipeline::CompletionResult,
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Persists completion results as `<dest_dir>/<stem>.<ext>`.
///
/// Existing files are replaced without backup unless the policy is
/// [`OverwritePolicy::Skip`].
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dest_dir: PathBuf,
    extension: String,
    overwrite: OverwritePolicy,
}

impl OutputWriter {
    /// Creates a writer for one destination folder and extension.
    #[must_use]
    pub fn new(
        dest_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        overwrite: OverwritePolicy,
    ) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            extension: extension.into(),
            overwrite,
        }
    }

    /// Computes the destination path for a source stem.
    #[must_use]
    pub fn destination_path(&self, stem: &str) -> PathBuf {
        self.dest_dir.join(format!("{stem}.{}", self.extension))
    }

    /// Returns the existing destination path if the policy says to leave it.
    #[must_use]
    pub fn existing_to_keep(&self, stem: &str) -> Option<PathBuf> {
        match self.overwrite {
            OverwritePolicy::Overwrite => None,
            OverwritePolicy::Skip => {
                let path = self.destination_path(stem);
                path.exists().then_some(path)
            }
        }
    }

    /// Creates the destination folder and its parents. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dest_dir).map_err(|e| Error::io(&self.dest_dir, e))
    }

    /// Writes a completion result and returns the destination path.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created or the file cannot
    /// be written.
    pub fn write(&self, result: &CompletionResult) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.destination_path(&result.stem);
        self.write_file_atomic(&path, &result.stem, &result.text)?;

        debug!("Wrote {} bytes to {}", result.text.len(), path.display());
        Ok(path)
    }

    /// Writes to a hidden temp file next to the target, syncs it, then
    /// renames it over the target. The temp file is removed on any failure.
    fn write_file_atomic(&self, path: &Path, stem: &str, content: &str) -> Result<()> {
        let temp_path = self.temp_path(stem);

        let result = Self::write_and_sync(&temp_path, content)
            .and_then(|()| fs::rename(&temp_path, path).map_err(|e| Error::io(path, e)));

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn temp_path(&self, stem: &str) -> PathBuf {
        self.dest_dir.join(format!(".{stem}.{}.tmp", self.extension))
    }

    fn write_and_sync(temp_path: &Path, content: &str) -> Result<()> {
        let mut temp_file = fs::File::create(temp_path).map_err(|e| Error::io(temp_path, e))?;

        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| Error::io(temp_path, e))?;

        temp_file.sync_all().map_err(|e| Error::io(temp_path, e))
    }
}
