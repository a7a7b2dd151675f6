use crate::error::{Error, Result};
use crate::template::TOPIC_PLACEHOLDER;
use std::fs;
use std::path::Path;
use tera::Tera;

/// Maximum template file size (1MB)
const MAX_TEMPLATE_SIZE: u64 = 1024 * 1024;

/// Validates external prompt templates
pub(crate) struct TemplateValidator;

impl TemplateValidator {
    /// Validates a template file and returns its content.
    ///
    /// Performs the following checks:
    /// 1. File exists and is a regular file
    /// 2. File size is within limits
    /// 3. Template is not blank
    /// 4. Template syntax is valid (can be compiled by Tera)
    /// 5. Template references the `topic` placeholder
    ///
    /// # Errors
    ///
    /// Returns an error if any check fails.
    pub(crate) fn load(path: &Path) -> Result<String> {
        let display = path.to_string_lossy().to_string();

        if !path.exists() {
            return Err(Error::read(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "Template file not found"),
            ));
        }

        if !path.is_file() {
            return Err(Error::template_validation(display, "Path is not a file"));
        }

        let metadata = fs::metadata(path).map_err(|e| Error::read(path, e))?;
        if metadata.len() > MAX_TEMPLATE_SIZE {
            return Err(Error::template_validation(
                display,
                format!(
                    "Template file too large: {} bytes (max: {} bytes)",
                    metadata.len(),
                    MAX_TEMPLATE_SIZE
                ),
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;

        if content.trim().is_empty() {
            return Err(Error::template_validation(display, "Template file is empty"));
        }

        let mut temp_tera = Tera::default();
        temp_tera
            .add_raw_template("validation", &content)
            .map_err(|e| {
                Error::template_validation(display.clone(), format!("Template syntax error: {e}"))
            })?;

        if !Self::references_topic(&content) {
            return Err(Error::template_validation(
                display,
                format!(
                    "Template never uses the source content; add {{{{ {TOPIC_PLACEHOLDER} }}}}"
                ),
            ));
        }

        Ok(content)
    }

    /// Heuristic check for `{{ topic }}`, `{{topic}}` or `{{ topic | filter }}`.
    fn references_topic(content: &str) -> bool {
        content.match_indices("{{").any(|(start, _)| {
            let rest = content[start + 2..].trim_start_matches(['-', ' ', '\t']);
            rest.strip_prefix(TOPIC_PLACEHOLDER)
                .and_then(|after| after.chars().next())
                .is_some_and(|c| !(c.is_alphanumeric() || c == '_'))
        })
    }
}
