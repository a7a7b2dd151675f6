use crate::{
    cancel::CancellationToken,
    collector::FileCollector,
    completer::{OpenAiCompleter, TextCompleter},
    config::Config,
    error::Result,
    mode::RunMode,
    pipeline::{PipelineSettings, TransformPipeline},
    report::RunReport,
    template::TemplateRegistry,
    template_validator::TemplateValidator,
    writer::OutputWriter,
};
use once_cell::sync::OnceCell;
use std::{borrow::Cow, sync::Arc, time::Instant};
use tracing::{info, instrument, warn};

/// Sole entry point: interprets the mode string and drives one run.
pub struct ModeDispatcher {
    config: Config,
    registry: TemplateRegistry,
    collector: FileCollector,
    completer: OnceCell<Arc<dyn TextCompleter>>,
    cancel: CancellationToken,
}

impl ModeDispatcher {
    /// Creates a dispatcher that talks to the configured OpenAI endpoint.
    ///
    /// The credential is checked when a run starts, after the mode has been
    /// validated and before any file is touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the built-in
    /// templates fail to compile.
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, OnceCell::new())
    }

    /// Creates a dispatcher that uses `completer` instead of the HTTP client.
    ///
    /// # Errors
    ///
    /// Same as [`ModeDispatcher::new`].
    pub fn with_completer(config: Config, completer: Arc<dyn TextCompleter>) -> Result<Self> {
        Self::build(config, OnceCell::with_value(completer))
    }

    fn build(config: Config, completer: OnceCell<Arc<dyn TextCompleter>>) -> Result<Self> {
        config.validate()?;

        let collector = FileCollector::new(config.suffix.clone(), &config.exclude_patterns)?;

        Ok(Self {
            config,
            registry: TemplateRegistry::builtin()?,
            collector,
            completer,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the current run between files when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validates `mode` and runs it.
    ///
    /// An unrecognized mode is rejected before any file-system access.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidMode`] for an unknown mode, otherwise
    /// any error from [`ModeDispatcher::run`].
    #[instrument(skip(self), fields(source_dir = %self.config.source_dir.display()))]
    pub fn execute(&self, mode: &str) -> Result<RunReport> {
        let mode: RunMode = mode.parse()?;
        self.run(mode)
    }

    /// Runs one mode: collect, render, complete, write.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing, the source directory
    /// does not exist, a template override is invalid, or a file fails under
    /// the fail-fast policy.
    pub fn run(&self, mode: RunMode) -> Result<RunReport> {
        let start_time = Instant::now();

        let completer = if self.config.dry_run {
            None
        } else {
            Some(self.completer()?)
        };

        let registry = self.registry_for(mode)?;
        let template = registry.get(mode.template_name())?;
        let dest_dir = self.config.destination_dir(mode);

        info!("Stage 1/3: Collecting sources...");
        let collect_start = Instant::now();
        let files = self.collector.collect(&self.config.source_dir)?;
        let collect_duration = collect_start.elapsed();
        info!(
            "✓ Collected {} '*{}' files from {}",
            files.len(),
            self.collector.suffix(),
            self.config.source_dir.display()
        );

        let settings = PipelineSettings {
            failure_policy: self.config.failure_policy,
            jobs: self.config.effective_jobs(),
            cancel: self.cancel.clone(),
        };
        let pipeline = TransformPipeline::new(&registry, template, &self.config.model, settings);
        let writer = OutputWriter::new(&dest_dir, mode.extension(), self.config.overwrite);

        let outcomes = match completer {
            None => {
                warn!("Dry run mode enabled - skipping completions and writes");
                info!("Stage 2/3: Rendering prompts...");
                pipeline.preview(&files, &writer)?
            }
            Some(completer) => {
                writer.ensure_dir()?;
                info!("Stage 2/3: Generating with '{}'...", self.config.model.model);
                pipeline.run(&files, &**completer, &writer)?
            }
        };

        info!("Stage 3/3: Reporting...");
        let report = RunReport::new(
            mode,
            template.name(),
            &self.config.source_dir,
            &dest_dir,
            self.config.dry_run,
            outcomes,
            collect_duration,
            start_time.elapsed(),
        );

        if report.has_failures() {
            warn!("{} of {} files failed", report.failed, report.collected);
        }

        if let Some(ref path) = self.config.report_path {
            report.write_json(path)?;
        }

        info!(
            "✓ {} ({} written, {} skipped) in {:.2}s",
            mode.completion_message(),
            report.written,
            report.skipped,
            report.duration_secs
        );

        Ok(report)
    }

    fn completer(&self) -> Result<&Arc<dyn TextCompleter>> {
        self.completer.get_or_try_init(|| {
            let key = self.config.require_api_key()?.clone();
            let completer: Arc<dyn TextCompleter> = Arc::new(OpenAiCompleter::new(key)?);
            Ok(completer)
        })
    }

    /// Built-in registry, or a copy with the mode's template replaced.
    fn registry_for(&self, mode: RunMode) -> Result<Cow<'_, TemplateRegistry>> {
        let Some(ref path) = self.config.template_path else {
            return Ok(Cow::Borrowed(&self.registry));
        };

        let body = TemplateValidator::load(path)?;
        let mut registry = self.registry.clone();
        registry.register(mode.template_name(), body)?;
        info!(
            "Using template {} for mode '{}'",
            path.display(),
            mode.id()
        );
        Ok(Cow::Owned(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::error::Error;
    use assert_fs::prelude::*;

    struct Upper;

    impl TextCompleter for Upper {
        fn complete(&self, prompt: &str, _model: &ModelConfig) -> Result<String> {
            Ok(prompt.to_uppercase())
        }
    }

    fn config_in(temp: &assert_fs::TempDir) -> crate::config::ConfigBuilder {
        Config::builder()
            .source_dir(temp.path().join("contracts"))
            .output_root(temp.path())
    }

    #[test]
    fn test_missing_credential_fails_before_io() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("contracts/A.sol").write_str("contract A {}").unwrap();

        let dispatcher = ModeDispatcher::new(config_in(&temp).build().unwrap()).unwrap();
        let err = dispatcher.execute("document").unwrap_err();

        assert!(err.is_config());
        assert!(!temp.child("documents").exists());
    }

    #[test]
    fn test_injected_completer_needs_no_credential() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("contracts/A.sol").write_str("contract A {}").unwrap();

        let config = config_in(&temp).build().unwrap();
        assert!(config.api_key.is_none());
        let dispatcher = ModeDispatcher::with_completer(config, Arc::new(Upper)).unwrap();

        let report = dispatcher.execute("document").unwrap();
        assert_eq!(report.written, 1);
    }

    #[test]
    fn test_invalid_mode_takes_precedence() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dispatcher = ModeDispatcher::new(config_in(&temp).build().unwrap()).unwrap();

        let err = dispatcher.execute("bogus").unwrap_err();
        assert!(matches!(err, Error::InvalidMode { .. }));
    }

    #[test]
    fn test_missing_source_dir_creates_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let dispatcher =
            ModeDispatcher::with_completer(config_in(&temp).build().unwrap(), Arc::new(Upper))
                .unwrap();

        let err = dispatcher.execute("test").unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound { .. }));
        assert!(!temp.child("test").exists());
    }

    #[test]
    fn test_template_override() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("contracts/A.sol").write_str("contract a {}").unwrap();
        temp.child("custom.tera")
            .write_str("audit: {{ topic }}")
            .unwrap();

        let config = config_in(&temp)
            .template_path(temp.path().join("custom.tera"))
            .build()
            .unwrap();
        let dispatcher = ModeDispatcher::with_completer(config, Arc::new(Upper)).unwrap();

        let report = dispatcher.execute("document").unwrap();
        assert_eq!(report.written, 1);
        temp.child("documents/A.txt").assert("AUDIT: CONTRACT A {}");
    }

    #[test]
    fn test_dry_run_needs_no_credential() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("contracts/A.sol").write_str("contract A {}").unwrap();

        let config = config_in(&temp).dry_run(true).build().unwrap();
        let dispatcher = ModeDispatcher::new(config).unwrap();

        let report = dispatcher.execute("integration").unwrap();
        assert!(report.dry_run);
        assert_eq!(report.collected, 1);
        assert_eq!(report.written, 0);
        assert!(!temp.child("integration").exists());
    }

    #[test]
    fn test_report_file_written() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("contracts/A.sol").write_str("contract A {}").unwrap();

        let config = config_in(&temp)
            .report_path(temp.path().join("report.json"))
            .build()
            .unwrap();
        let dispatcher = ModeDispatcher::with_completer(config, Arc::new(Upper)).unwrap();
        dispatcher.execute("test").unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report["mode"], "test");
        assert_eq!(report["written"], 1);
    }
}
