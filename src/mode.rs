//! Run modes and their output conventions.
//!
//! Each mode binds one built-in prompt template to one destination folder
//! and one destination file extension.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Generation intent selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Human-readable explanation document
    Document,
    /// Unit-test file
    Test,
    /// Integration-glue file
    Integration,
}

impl RunMode {
    /// Returns the literal name accepted on the command line.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Test => "test",
            Self::Integration => "integration",
        }
    }

    /// Returns all available modes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Document, Self::Test, Self::Integration]
    }

    /// Parse a mode from its literal name. Matching is exact and case-sensitive.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "document" => Some(Self::Document),
            "test" => Some(Self::Test),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }

    /// Name of the built-in template used by this mode.
    #[must_use]
    pub const fn template_name(self) -> &'static str {
        match self {
            Self::Document => "createDocument",
            Self::Test => "createTest",
            Self::Integration => "createIntegration",
        }
    }

    /// Destination folder, relative to the output root.
    #[must_use]
    pub const fn folder(self) -> &'static str {
        match self {
            Self::Document => "documents",
            Self::Test => "test",
            Self::Integration => "integration",
        }
    }

    /// Destination file extension (without the leading dot).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Document => "txt",
            Self::Test | Self::Integration => "ts",
        }
    }

    /// Message reported after a successful run of this mode.
    #[must_use]
    pub const fn completion_message(self) -> &'static str {
        match self {
            Self::Document => "document created successfully.",
            Self::Test => "test created successfully.",
            Self::Integration => "Integration file created successfully.",
        }
    }

    /// Comma separated list of valid mode names, quoted.
    #[must_use]
    pub fn valid_options() -> String {
        Self::all()
            .iter()
            .map(|m| format!("'{}'", m.id()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s).ok_or_else(|| Error::InvalidMode {
            mode: s.to_string(),
            valid: Self::valid_options(),
        })
    }
}
