use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for the sol-scribe library.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// IO error with context about the file path.
    #[error("IO error accessing '{path}': {message}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// An input file could not be read.
    #[error("Failed to read '{path}': {message}")]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration validation error (missing credential, bad limits).
    #[error("Invalid configuration: {message}")]
    Config {
        /// Detailed error message
        message: String,
    },

    /// Source directory is missing or is not a directory.
    #[error("Source directory not found: '{path}'")]
    DirectoryNotFound {
        /// Directory that was requested
        path: PathBuf,
    },

    /// No template is registered under the requested name.
    #[error("Unknown template '{name}'. Registered templates: {available}")]
    UnknownTemplate {
        /// Requested template name
        name: String,
        /// Comma separated list of registered names
        available: String,
    },

    /// The requested run mode is not one of the supported modes.
    #[error("Invalid option '{mode}'. Please choose one of: {valid}")]
    InvalidMode {
        /// Mode string supplied by the user
        mode: String,
        /// Comma separated list of valid modes
        valid: String,
    },

    /// External template file failed validation.
    #[error("Template validation failed for '{path}': {reason}")]
    TemplateValidation {
        /// Path of the template file
        path: String,
        /// Why validation failed
        reason: String,
    },

    /// Rendering a prompt for a source file failed.
    #[error("Failed to render template '{template}' for '{stem}': {message}")]
    Render {
        /// Template name
        template: String,
        /// Stem of the source file being rendered
        stem: String,
        /// Error message
        message: String,
    },

    /// The text completer failed for a source file.
    #[error("Completion failed for '{stem}': {message}")]
    Completion {
        /// Stem of the source file whose prompt was submitted
        stem: String,
        /// Error message
        message: String,
        /// Whether the call exceeded its timeout
        timed_out: bool,
    },

    /// The run was cancelled before all files were processed.
    #[error("Run cancelled after {processed} of {total} files")]
    Cancelled {
        /// Files that were fully handled before cancellation
        processed: usize,
        /// Files collected for the run
        total: usize,
    },

    /// JSON serialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

}

impl Error {
    /// Creates an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a read error for an input file.
    #[must_use]
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a directory-not-found error.
    #[must_use]
    pub fn directory_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DirectoryNotFound { path: path.into() }
    }

    /// Creates a render error for the given template and source stem.
    #[must_use]
    pub fn render(
        template: impl Into<String>,
        stem: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Render {
            template: template.into(),
            stem: stem.into(),
            message: message.into(),
        }
    }

    /// Creates a completion error for the given source stem.
    #[must_use]
    pub fn completion(stem: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Completion {
            stem: stem.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a completion error caused by a timeout.
    #[must_use]
    pub fn completion_timeout(stem: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Completion {
            stem: stem.into(),
            message: message.into(),
            timed_out: true,
        }
    }

    /// Creates a template validation error.
    #[must_use]
    pub fn template_validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Re-tags a completion error with the stem of the file it belongs to.
    ///
    /// Completers do not know which file a prompt came from, so they report
    /// an empty stem and the pipeline fills it in.
    #[must_use]
    pub fn with_stem(self, stem: &str) -> Self {
        match self {
            Self::Completion {
                message, timed_out, ..
            } => Self::Completion {
                stem: stem.to_string(),
                message,
                timed_out,
            },
            Self::Render {
                template, message, ..
            } => Self::Render {
                template,
                stem: stem.to_string(),
                message,
            },
            other => other,
        }
    }

    /// Returns true if this is an IO error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if an input file could not be read.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if this error belongs to a single file rather than the run.
    #[must_use]
    pub const fn is_per_file(&self) -> bool {
        matches!(self, Self::Render { .. } | Self::Completion { .. })
    }

    /// Returns true if this is a completion error caused by a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Completion { timed_out: true, .. })
    }

    /// Name of the pipeline stage that produced this error.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Config { .. } => "configuration",
            Self::InvalidMode { .. } | Self::UnknownTemplate { .. } => "mode",
            Self::TemplateValidation { .. } => "template",
            Self::DirectoryNotFound { .. } => "collect",
            Self::Render { .. } => "render",
            Self::Completion { .. } => "complete",
            Self::Cancelled { .. } => "cancel",
            Self::Read { .. } => "read",
            Self::Io { .. } | Self::Serialization { .. } => "write",
        }
    }

    /// Process exit status for this error class (sysexits-style).
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidMode { .. } | Self::UnknownTemplate { .. } => 64,
            Self::Render { .. } | Self::TemplateValidation { .. } => 65,
            Self::DirectoryNotFound { .. } | Self::Read { .. } => 66,
            Self::Completion { .. } => 69,
            Self::Config { .. } => 78,
            Self::Cancelled { .. } => 130,
            Self::Io { .. } | Self::Serialization { .. } => 74,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
