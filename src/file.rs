use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// A source file read for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path the file was read from
    pub path: PathBuf,

    /// File name without its extension
    pub stem: String,

    /// Raw UTF-8 content
    pub content: String,
}

impl SourceFile {
    /// Creates a source file from already loaded content.
    #[must_use]
    pub fn new(path: PathBuf, stem: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path,
            stem: stem.into(),
            content: content.into(),
        }
    }

    /// Reads a source file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid UTF-8.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                Error::Read {
                    path: path.to_path_buf(),
                    message: "invalid UTF-8 encoding; file may be binary".to_string(),
                }
            } else {
                Error::read(path, e)
            }
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            stem: file_stem(path),
            content,
        })
    }

    /// Number of lines in the content.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

/// Returns the file name with its last extension removed.
///
/// `Token.sol` becomes `Token`, `Token.v2.sol` becomes `Token.v2`.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
