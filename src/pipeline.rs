use crate::{
    cancel::CancellationToken,
    completer::TextCompleter,
    config::{FailurePolicy, ModelConfig},
    error::{Error, Result},
    file::SourceFile,
    template::{RenderedPrompt, Template, TemplateRegistry},
    writer::OutputWriter,
};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, trace, warn};

/// Generated text for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    /// Stem of the originating source file
    pub stem: String,

    /// Text returned by the completer
    pub text: String,
}

/// What happened to a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Output was written to `path`
    Written {
        /// Destination file
        path: PathBuf,
    },
    /// File was left alone
    Skipped {
        /// Why the file was skipped
        reason: String,
    },
    /// Rendering or completion failed and the run continued
    Failed {
        /// Stage that failed
        stage: String,
        /// Error message
        error: String,
    },
    /// Prompt was rendered but not submitted (dry run)
    Rendered {
        /// Size of the rendered prompt
        prompt_bytes: usize,
    },
}

/// Per-file record kept in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    /// Source stem
    pub stem: String,

    /// Source path
    pub source: PathBuf,

    /// Result for this file
    #[serde(flatten)]
    pub status: FileStatus,

    /// Wall time spent on this file in milliseconds
    pub duration_ms: u64,
}

impl FileOutcome {
    fn new(file: &SourceFile, status: FileStatus, elapsed: Duration) -> Self {
        Self {
            stem: file.stem.clone(),
            source: file.path.clone(),
            status,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn failed(file: &SourceFile, error: &Error, elapsed: Duration) -> Self {
        Self::new(
            file,
            FileStatus::Failed {
                stage: error.stage().to_string(),
                error: error.to_string(),
            },
            elapsed,
        )
    }
}

/// Scheduling and failure settings for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Per-file failure handling
    pub failure_policy: FailurePolicy,

    /// Maximum number of files processed at once
    pub jobs: usize,

    /// Stops the run between files when raised
    pub cancel: CancellationToken,
}

/// Runs source files through render, complete and write.
pub struct TransformPipeline<'a> {
    registry: &'a TemplateRegistry,
    template: &'a Template,
    model: &'a ModelConfig,
    settings: PipelineSettings,
}

impl<'a> TransformPipeline<'a> {
    /// Creates a pipeline for one template.
    #[must_use]
    pub fn new(
        registry: &'a TemplateRegistry,
        template: &'a Template,
        model: &'a ModelConfig,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            template,
            model,
            settings,
        }
    }

    /// Renders the template for one file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Render`] if the content cannot be substituted.
    pub fn render(&self, file: &SourceFile) -> Result<RenderedPrompt> {
        let prompt = self.registry.render(self.template, file)?;
        trace!("Rendered prompt for {}:\n{}", file.stem, prompt.body);
        Ok(prompt)
    }

    /// Renders and completes one file.
    ///
    /// # Errors
    ///
    /// Returns a render or completion error tagged with the file's stem.
    pub fn process(
        &self,
        file: &SourceFile,
        completer: &dyn TextCompleter,
    ) -> Result<CompletionResult> {
        let prompt = self.render(file)?;

        debug!(
            "Requesting completion for {} ({} lines)",
            file.stem,
            file.line_count()
        );
        let text = completer
            .complete(&prompt.body, self.model)
            .map_err(|e| e.with_stem(&file.stem))?;

        Ok(CompletionResult {
            stem: file.stem.clone(),
            text,
        })
    }

    /// Processes every file and writes each result as soon as it is ready.
    ///
    /// Files are handled in order when `jobs <= 1`, otherwise by a bounded
    /// pool of scoped threads. Outcomes are always returned in input order.
    /// Output written before a failure or cancellation stays on disk.
    ///
    /// # Errors
    ///
    /// Returns the first failing file's error under
    /// [`FailurePolicy::FailFast`], any write error, or
    /// [`Error::Cancelled`] if the cancellation token was raised.
    pub fn run(
        &self,
        files: &[SourceFile],
        completer: &dyn TextCompleter,
        writer: &OutputWriter,
    ) -> Result<Vec<FileOutcome>> {
        let workers = self.settings.jobs.min(files.len()).max(1);
        info!(
            "Processing {} files with template '{}' ({} worker{})",
            files.len(),
            self.template.name(),
            workers,
            if workers == 1 { "" } else { "s" }
        );

        if workers == 1 {
            self.run_sequential(files, completer, writer)
        } else {
            self.run_parallel(files, completer, writer, workers)
        }
    }

    /// Renders every prompt without calling the completer or writing.
    ///
    /// # Errors
    ///
    /// Returns the first render error under [`FailurePolicy::FailFast`].
    pub fn preview(&self, files: &[SourceFile], writer: &OutputWriter) -> Result<Vec<FileOutcome>> {
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            let start = Instant::now();
            match self.render(file) {
                Ok(prompt) => {
                    info!(
                        "[dry run] {} -> {} ({} prompt bytes)",
                        file.path.display(),
                        writer.destination_path(&file.stem).display(),
                        prompt.body.len()
                    );
                    outcomes.push(FileOutcome::new(
                        file,
                        FileStatus::Rendered {
                            prompt_bytes: prompt.body.len(),
                        },
                        start.elapsed(),
                    ));
                }
                Err(e) => {
                    self.absorb(&e)?;
                    outcomes.push(FileOutcome::failed(file, &e, start.elapsed()));
                }
            }
        }

        Ok(outcomes)
    }

    fn run_sequential(
        &self,
        files: &[SourceFile],
        completer: &dyn TextCompleter,
        writer: &OutputWriter,
    ) -> Result<Vec<FileOutcome>> {
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            if self.settings.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    processed: outcomes.len(),
                    total: files.len(),
                });
            }

            let start = Instant::now();
            match self.handle(file, completer, writer) {
                Ok(status) => outcomes.push(FileOutcome::new(file, status, start.elapsed())),
                Err(e) => {
                    self.absorb(&e)?;
                    outcomes.push(FileOutcome::failed(file, &e, start.elapsed()));
                }
            }
        }

        Ok(outcomes)
    }

    fn run_parallel(
        &self,
        files: &[SourceFile],
        completer: &dyn TextCompleter,
        writer: &OutputWriter,
        workers: usize,
    ) -> Result<Vec<FileOutcome>> {
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let slots: Mutex<Vec<Option<FileOutcome>>> =
            Mutex::new((0..files.len()).map(|_| None).collect());
        let first_error: Mutex<Option<(usize, Error)>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if abort.load(Ordering::SeqCst) || self.settings.cancel.is_cancelled() {
                            break;
                        }

                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(file) = files.get(index) else {
                            break;
                        };

                        let start = Instant::now();
                        let outcome = match self.handle(file, completer, writer) {
                            Ok(status) => FileOutcome::new(file, status, start.elapsed()),
                            Err(e) => {
                                if self.absorb(&e).is_err() {
                                    abort.store(true, Ordering::SeqCst);
                                    let mut slot =
                                        first_error.lock().unwrap_or_else(PoisonError::into_inner);
                                    if slot.as_ref().is_none_or(|(earlier, _)| index < *earlier) {
                                        *slot = Some((index, e));
                                    }
                                    break;
                                }
                                FileOutcome::failed(file, &e, start.elapsed())
                            }
                        };

                        slots.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                            Some(outcome);
                    }
                });
            }
        });

        if let Some((_, e)) = first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(e);
        }

        let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        let processed = slots.iter().filter(|s| s.is_some()).count();
        if processed < files.len() {
            return Err(Error::Cancelled {
                processed,
                total: files.len(),
            });
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Handles one file end to end.
    fn handle(
        &self,
        file: &SourceFile,
        completer: &dyn TextCompleter,
        writer: &OutputWriter,
    ) -> Result<FileStatus> {
        if let Some(existing) = writer.existing_to_keep(&file.stem) {
            warn!(
                "Skipping {}: {} already exists",
                file.stem,
                existing.display()
            );
            return Ok(FileStatus::Skipped {
                reason: format!("{} already exists", existing.display()),
            });
        }

        let result = self.process(file, completer)?;
        let path = writer.write(&result)?;
        Ok(FileStatus::Written { path })
    }

    /// Decides whether a file's error stops the run.
    ///
    /// Returns `Ok` when the error was logged and the run should continue.
    fn absorb(&self, error: &Error) -> Result<()> {
        match self.settings.failure_policy {
            FailurePolicy::Continue if error.is_per_file() => {
                warn!("{} (continuing)", error);
                Ok(())
            }
            _ => Err(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverwritePolicy;
    use assert_fs::prelude::*;
    use std::collections::HashSet;

    /// Echoes a prefix of the prompt and fails for selected markers.
    struct ScriptedCompleter {
        fail_on: HashSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedCompleter {
        fn new(fail_on: &[&'static str]) -> Self {
            Self {
                fail_on: fail_on.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TextCompleter for ScriptedCompleter {
        fn complete(&self, prompt: &str, _model: &ModelConfig) -> Result<String> {
            self.calls.lock().unwrap().push(prompt.to_string());
            if self.fail_on.iter().any(|m| prompt.contains(m)) {
                return Err(Error::completion_timeout("", "deadline exceeded"));
            }
            Ok(format!("OUT[{prompt}]"))
        }
    }

    fn files(names: &[&str]) -> Vec<SourceFile> {
        names
            .iter()
            .map(|n| SourceFile::new(PathBuf::from(format!("{n}.sol")), *n, format!("contract {n}")))
            .collect()
    }

    fn registry() -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        registry.register("echo", "{{ topic }}").unwrap();
        registry
    }

    fn settings(policy: FailurePolicy, jobs: usize) -> PipelineSettings {
        PipelineSettings {
            failure_policy: policy,
            jobs,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_process_binds_stem_and_text() {
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline = TransformPipeline::new(&registry, template, &model, PipelineSettings::default());

        let completer = ScriptedCompleter::new(&[]);
        let result = pipeline.process(&files(&["A"])[0], &completer).unwrap();

        assert_eq!(result.stem, "A");
        assert_eq!(result.text, "OUT[contract A]");
    }

    #[test]
    fn test_sequential_fail_fast_stops_queue() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::FailFast, 1));
        let writer = OutputWriter::new(temp.path(), "txt", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&["contract B"]);

        let err = pipeline
            .run(&files(&["A", "B", "C"]), &completer, &writer)
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("'B'"));
        assert_eq!(completer.calls().len(), 2);
        temp.child("A.txt").assert("OUT[contract A]");
        assert!(!temp.child("B.txt").exists());
        assert!(!temp.child("C.txt").exists());
    }

    #[test]
    fn test_continue_policy_records_failures() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::Continue, 1));
        let writer = OutputWriter::new(temp.path(), "txt", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&["contract B"]);

        let outcomes = pipeline
            .run(&files(&["A", "B", "C"]), &completer, &writer)
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[1].status, FileStatus::Failed { ref stage, .. } if stage == "complete"));
        temp.child("A.txt").assert("OUT[contract A]");
        temp.child("C.txt").assert("OUT[contract C]");
    }

    #[test]
    fn test_render_error_is_per_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::Continue, 1));
        let writer = OutputWriter::new(temp.path(), "txt", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&[]);

        let mut inputs = files(&["A", "B"]);
        inputs[0].content = "bad\0content".to_string();

        let outcomes = pipeline.run(&inputs, &completer, &writer).unwrap();
        assert!(matches!(outcomes[0].status, FileStatus::Failed { ref stage, .. } if stage == "render"));
        assert!(matches!(outcomes[1].status, FileStatus::Written { .. }));
        assert_eq!(completer.calls().len(), 1);
    }

    #[test]
    fn test_parallel_preserves_order() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::FailFast, 4));
        let writer = OutputWriter::new(temp.path(), "ts", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&[]);

        let names = ["A", "B", "C", "D", "E", "F", "G", "H"];
        let outcomes = pipeline.run(&files(&names), &completer, &writer).unwrap();

        let stems: Vec<&str> = outcomes.iter().map(|o| o.stem.as_str()).collect();
        assert_eq!(stems, names);
        for name in names {
            temp.child(format!("{name}.ts"))
                .assert(format!("OUT[contract {name}]").as_str());
        }
    }

    #[test]
    fn test_parallel_fail_fast_reports_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::FailFast, 3));
        let writer = OutputWriter::new(temp.path(), "ts", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&["contract A"]);

        let err = pipeline
            .run(&files(&["A", "B", "C", "D"]), &completer, &writer)
            .unwrap_err();
        assert!(matches!(err, Error::Completion { ref stem, .. } if stem == "A"));
        assert!(!temp.child("A.ts").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let settings = settings(FailurePolicy::FailFast, 1);
        settings.cancel.cancel();
        let pipeline = TransformPipeline::new(&registry, template, &model, settings);
        let writer = OutputWriter::new(temp.path(), "txt", OverwritePolicy::Overwrite);
        let completer = ScriptedCompleter::new(&[]);

        let err = pipeline
            .run(&files(&["A", "B"]), &completer, &writer)
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled { processed: 0, total: 2 }));
        assert!(completer.calls().is_empty());
    }

    /// Raises the cancellation token on its second call.
    struct CancelOnSecondCall {
        cancel: CancellationToken,
        calls: Mutex<Vec<String>>,
    }

    impl TextCompleter for CancelOnSecondCall {
        fn complete(&self, prompt: &str, _model: &ModelConfig) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(prompt.to_string());
            if calls.len() == 2 {
                self.cancel.cancel();
            }
            Ok(format!("OUT[{prompt}]"))
        }
    }

    #[test]
    fn test_parallel_cancel_mid_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let settings = settings(FailurePolicy::FailFast, 2);
        let completer = CancelOnSecondCall {
            cancel: settings.cancel.clone(),
            calls: Mutex::new(Vec::new()),
        };
        let pipeline = TransformPipeline::new(&registry, template, &model, settings);
        let writer = OutputWriter::new(temp.path(), "ts", OverwritePolicy::Overwrite);

        let names = ["A", "B", "C", "D", "E", "F", "G", "H"];
        let err = pipeline
            .run(&files(&names), &completer, &writer)
            .unwrap_err();

        // Each worker may finish the call it started before the flag was raised.
        let sent = completer.calls.lock().unwrap().len();
        assert!((2..=3).contains(&sent));
        assert!(matches!(err, Error::Cancelled { processed, total: 8 } if processed == sent));

        let written = names
            .iter()
            .filter(|n| temp.child(format!("{n}.ts")).exists())
            .count();
        assert_eq!(written, sent);
    }

    #[test]
    fn test_skip_existing_avoids_completion() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("A.txt").write_str("hand written").unwrap();

        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline =
            TransformPipeline::new(&registry, template, &model, settings(FailurePolicy::FailFast, 1));
        let writer = OutputWriter::new(temp.path(), "txt", OverwritePolicy::Skip);
        let completer = ScriptedCompleter::new(&[]);

        let outcomes = pipeline
            .run(&files(&["A", "B"]), &completer, &writer)
            .unwrap();

        assert!(matches!(outcomes[0].status, FileStatus::Skipped { .. }));
        temp.child("A.txt").assert("hand written");
        assert_eq!(completer.calls(), vec!["contract B".to_string()]);
    }

    #[test]
    fn test_preview_writes_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let registry = registry();
        let template = registry.get("echo").unwrap();
        let model = ModelConfig::default();
        let pipeline = TransformPipeline::new(&registry, template, &model, PipelineSettings::default());
        let writer = OutputWriter::new(temp.path().join("out"), "txt", OverwritePolicy::Overwrite);

        let outcomes = pipeline.preview(&files(&["A"]), &writer).unwrap();

        assert_eq!(
            outcomes[0].status,
            FileStatus::Rendered {
                prompt_bytes: "contract A".len()
            }
        );
        assert!(!temp.child("out").exists());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = FileOutcome::new(
            &files(&["A"])[0],
            FileStatus::Written {
                path: PathBuf::from("documents/A.txt"),
            },
            Duration::from_millis(12),
        );

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stem"], "A");
        assert_eq!(json["status"], "written");
        assert_eq!(json["path"], "documents/A.txt");
        assert_eq!(json["duration_ms"], 12);
    }
}
