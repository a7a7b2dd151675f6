use crate::{
    error::{Error, Result},
    file::SourceFile,
};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tera::{Context, Tera};

/// The single placeholder every prompt template binds source content to.
pub const TOPIC_PLACEHOLDER: &str = "topic";

static BUILTIN_TEMPLATES: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("createDocument", include_str!("../templates/document.tera")),
        ("createTest", include_str!("../templates/test.tera")),
        ("createIntegration", include_str!("../templates/integration.tera")),
    ])
});

/// A named prompt template with its declared placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    placeholders: Vec<String>,
    body: String,
}

impl Template {
    /// Template name used for lookup.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names, in declaration order.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Raw template body in Tera syntax.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// A template with source content substituted into its placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Name of the template that produced this prompt
    pub template: String,
    /// Fully substituted prompt text
    pub body: String,
}

/// Registry of prompt templates backed by a Tera instance.
///
/// Source content is inserted as a context value, so Tera never parses it:
/// `{{ topic }}` or `{% raw %}` inside a contract are emitted literally.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    tera: Tera,
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let mut tera = Tera::default();
        // Prompts are plain text; never HTML-escape contract source.
        tera.autoescape_on(Vec::new());

        Self {
            tera,
            templates: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the three built-in prompt templates.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in template fails to compile.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for (name, body) in BUILTIN_TEMPLATES.iter() {
            registry.register(*name, *body)?;
        }
        Ok(registry)
    }

    /// Registers (or replaces) a template bound to the `topic` placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid Tera syntax.
    pub fn register(&mut self, name: impl Into<String>, body: impl Into<String>) -> Result<()> {
        let name = name.into();
        let body = body.into();

        self.tera
            .add_raw_template(&name, &body)
            .map_err(|e| Error::template_validation(&name, e.to_string()))?;

        self.templates.insert(
            name.clone(),
            Template {
                name,
                placeholders: vec![TOPIC_PLACEHOLDER.to_string()],
                body,
            },
        );
        Ok(())
    }

    /// Looks up a template by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] if no template has that name.
    pub fn get(&self, name: &str) -> Result<&Template> {
        self.templates.get(name).ok_or_else(|| Error::UnknownTemplate {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Registered template names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// Renders `template` with the file's content bound to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if the content contains NUL bytes or if
    /// Tera fails to render the template.
    pub fn render(&self, template: &Template, file: &SourceFile) -> Result<RenderedPrompt> {
        let name = template.name();

        if let Some(offset) = memchr::memchr(0, file.content.as_bytes()) {
            return Err(Error::render(
                name,
                &file.stem,
                format!("content contains a NUL byte at offset {offset}"),
            ));
        }

        let mut context = Context::new();
        for placeholder in template.placeholders() {
            context.insert(placeholder.as_str(), &file.content);
        }

        let body = self
            .tera
            .render(name, &context)
            .map_err(|e| Error::render(name, &file.stem, e.to_string()))?;

        Ok(RenderedPrompt {
            template: name.to_string(),
            body,
        })
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
