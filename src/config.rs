use crate::error::{Error, Result};
use crate::mode::RunMode;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const DEFAULT_SOURCE_DIR: &str = "contracts";
const DEFAULT_OUTPUT_ROOT: &str = ".";
const DEFAULT_SUFFIX: &str = ".sol";
const DEFAULT_JOBS: usize = 1;

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.9;
/// Default per-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default OpenAI-compatible API base URL.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const MAX_TEMPERATURE: f32 = 2.0;

/// Provider credential. The value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a credential value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential for use in an authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Model parameters passed to every completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Upper bound on generated tokens, provider default when unset
    pub max_tokens: Option<u32>,

    /// Timeout for a single completion call
    pub timeout: Duration,

    /// API base URL (without the `/chat/completions` path)
    pub endpoint: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl ModelConfig {
    /// Validates the model parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is empty, the temperature is outside
    /// `0.0..=2.0`, the timeout is zero or `max_tokens` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model identifier must not be empty"));
        }

        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(Error::config(format!(
                "temperature ({}) must be between 0.0 and {MAX_TEMPERATURE}",
                self.temperature
            )));
        }

        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than 0"));
        }

        if self.max_tokens == Some(0) {
            return Err(Error::config("max_tokens must be greater than 0"));
        }

        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "endpoint must be an http(s) URL: {}",
                self.endpoint
            )));
        }

        Ok(())
    }
}

/// What to do when a single file fails to render or complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the remaining files on the first failure
    #[default]
    FailFast,
    /// Log the failure and continue with the next file
    Continue,
}

/// What to do when a destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Replace the existing file without backup
    #[default]
    Overwrite,
    /// Leave the existing file and skip the source before completion
    Skip,
}

/// Configuration for a sol-scribe run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Directory holding the source contracts
    pub source_dir: PathBuf,

    /// Root under which the per-mode destination folders live
    pub output_root: PathBuf,

    /// Suffix source file names must end with
    pub suffix: String,

    /// Glob patterns for file names to leave out
    pub exclude_patterns: Vec<String>,

    /// Per-file failure handling
    pub failure_policy: FailurePolicy,

    /// Worker count (1 = sequential, 0 = one per CPU)
    pub jobs: usize,

    /// Handling of existing destination files
    pub overwrite: OverwritePolicy,

    /// Render prompts only; no completion calls and no writes
    pub dry_run: bool,

    /// Template file replacing the selected mode's built-in template
    pub template_path: Option<PathBuf>,

    /// Where to write the JSON run report
    pub report_path: Option<PathBuf>,

    /// Model parameters
    pub model: ModelConfig,

    /// Provider credential
    pub api_key: Option<ApiKey>,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use sol_scribe::Config;
    ///
    /// let config = Config::builder()
    ///     .source_dir("./contracts")
    ///     .temperature(0.2)
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Directories are not checked here; a missing source directory is
    /// reported when a run starts.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Model parameters are invalid
    /// - The suffix is empty
    /// - The report path points into a destination folder
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.suffix.is_empty() {
            return Err(Error::config("source suffix must not be empty"));
        }

        if let Some(ref report) = self.report_path {
            let report = without_cur_dir(report);
            for mode in RunMode::all() {
                if report.starts_with(without_cur_dir(&self.destination_dir(*mode))) {
                    return Err(Error::config(format!(
                        "report path must not be inside a destination folder: {}",
                        report.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Destination folder for `mode`.
    #[must_use]
    pub fn destination_dir(&self, mode: RunMode) -> PathBuf {
        self.output_root.join(mode.folder())
    }

    /// Number of worker threads to use.
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    /// Returns the credential or a configuration error naming the variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no non-empty credential is configured.
    pub fn require_api_key(&self) -> Result<&ApiKey> {
        match self.api_key {
            Some(ref key) if !key.expose().trim().is_empty() => Ok(key),
            _ => Err(Error::config(format!(
                "missing API credential; set {API_KEY_ENV} or pass --api-key"
            ))),
        }
    }
}

/// Drops `.` components so `./documents` and `documents` compare equal.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            suffix: DEFAULT_SUFFIX.to_string(),
            exclude_patterns: Vec::new(),
            failure_policy: FailurePolicy::default(),
            jobs: DEFAULT_JOBS,
            overwrite: OverwritePolicy::default(),
            dry_run: false,
            template_path: None,
            report_path: None,
            model: ModelConfig::default(),
            api_key: None,
        }
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    source_dir: Option<PathBuf>,
    output_root: Option<PathBuf>,
    suffix: Option<String>,
    exclude_patterns: Vec<String>,
    failure_policy: Option<FailurePolicy>,
    jobs: Option<usize>,
    overwrite: Option<OverwritePolicy>,
    dry_run: bool,
    template_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
    endpoint: Option<String>,
    api_key: Option<ApiKey>,
}

impl ConfigBuilder {
    /// Sets the directory holding source contracts.
    #[must_use]
    pub fn source_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(path.into());
        self
    }

    /// Sets the root directory for the destination folders.
    #[must_use]
    pub fn output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = Some(path.into());
        self
    }

    /// Sets the suffix source file names must end with.
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Sets glob patterns for file names to exclude.
    #[must_use]
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Sets the per-file failure policy.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    /// Sets the worker count (0 = one per CPU).
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Sets the policy for existing destination files.
    #[must_use]
    pub fn overwrite(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = Some(policy);
        self
    }

    /// Enables dry run mode (no completion calls, no writes).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets a template file that replaces the selected mode's template.
    ///
    /// The file must be valid Tera syntax and reference `{{ topic }}`.
    #[must_use]
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Sets the path of the JSON run report.
    #[must_use]
    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the maximum number of generated tokens.
    #[must_use]
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the provider credential.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let defaults = ModelConfig::default();
        let config = Config {
            source_dir: self
                .source_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR)),
            output_root: self
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            suffix: self.suffix.unwrap_or_else(|| DEFAULT_SUFFIX.to_string()),
            exclude_patterns: self.exclude_patterns,
            failure_policy: self.failure_policy.unwrap_or_default(),
            jobs: self.jobs.unwrap_or(DEFAULT_JOBS),
            overwrite: self.overwrite.unwrap_or_default(),
            dry_run: self.dry_run,
            template_path: self.template_path,
            report_path: self.report_path,
            model: ModelConfig {
                model: self.model.unwrap_or(defaults.model),
                temperature: self.temperature.unwrap_or(defaults.temperature),
                max_tokens: self.max_tokens,
                timeout: self.timeout.unwrap_or(defaults.timeout),
                endpoint: self.endpoint.unwrap_or(defaults.endpoint),
            },
            api_key: self.api_key,
        };

        config.validate()?;
        Ok(config)
    }
}
