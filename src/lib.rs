//! # sol-scribe
//!
//! Generates explanation documents, unit tests and integration glue for
//! Solidity contracts by sending each contract through an LLM prompt.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sol_scribe::{Config, ModeDispatcher};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .source_dir("./contracts")
//!     .output_root(".")
//!     .api_key(std::env::var("OPENAI_API_KEY")?)
//!     .build()?;
//!
//! let report = ModeDispatcher::new(config)?.execute("document")?;
//! println!("{}", report.completion_message());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Dispatcher**: Resolves the mode to a template and output convention
//! 2. **Collector**: Lists `*.sol` files in the source directory
//! 3. **Pipeline**: Renders each prompt and requests a completion
//! 4. **Writer**: Persists each result as `<folder>/<stem>.<ext>`

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions, clippy::too_many_arguments)]

mod cancel;
mod collector;
mod completer;
mod config;
mod dispatcher;
mod error;
mod file;
mod mode;
mod pipeline;
mod report;
mod template;
mod template_validator;
mod writer;

pub use cancel::CancellationToken;
pub use collector::FileCollector;
pub use completer::{OpenAiCompleter, TextCompleter};
pub use config::{
    API_KEY_ENV, ApiKey, Config, ConfigBuilder, DEFAULT_ENDPOINT, DEFAULT_MODEL,
    DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS, FailurePolicy, ModelConfig, OverwritePolicy,
};
pub use dispatcher::ModeDispatcher;
pub use error::{Error, Result};
pub use file::SourceFile;
pub use mode::RunMode;
pub use pipeline::{
    CompletionResult, FileOutcome, FileStatus, PipelineSettings, TransformPipeline,
};
pub use report::RunReport;
pub use template::{RenderedPrompt, TOPIC_PLACEHOLDER, Template, TemplateRegistry};
pub use writer::OutputWriter;

/// Runs `mode` once with the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The mode is not `document`, `test` or `integration`
/// - The credential is missing
/// - The source directory doesn't exist
/// - A file fails under the fail-fast policy
/// - Output files cannot be written
///
/// # Examples
///
/// ```no_run
/// use sol_scribe::{Config, run};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::builder().api_key("sk-...").build()?;
/// run(config, "test")?;
/// # Ok(())
/// # }
/// ```
pub fn run(config: Config, mode: &str) -> Result<RunReport> {
    ModeDispatcher::new(config)?.execute(mode)
}
