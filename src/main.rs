use anyhow::Context;
use clap::{CommandFactory, Parser};
use sol_scribe::{
    API_KEY_ENV, Config, DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS, Error,
    FailurePolicy, ModeDispatcher, OverwritePolicy, RunReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "sol-scribe",
    version,
    author,
    about = "Generate docs, tests and integration code for Solidity contracts with an LLM",
    long_about = "Generate docs, tests and integration code for Solidity contracts with an LLM.\n\n\
    Every '*.sol' file in the source directory is rendered into the prompt for the \
    selected mode and sent to an OpenAI-compatible chat completion endpoint. The \
    response is written to the mode's folder under the output root:\n  \
      document     -> documents/<Name>.txt\n  \
      test         -> test/<Name>.ts\n  \
      integration  -> integration/<Name>.ts\n\n\
    USAGE EXAMPLES:\n  \
      # Explain every contract in ./contracts\n  \
      sol-scribe document\n\n  \
      # Generate Hardhat tests, four at a time, keeping going on failures\n  \
      sol-scribe test --jobs 4 --keep-going\n\n  \
      # Preview the integration prompts without calling the API\n  \
      sol-scribe integration --dry-run -v"
)]
struct Cli {
    /// Run mode: document, test or integration
    #[arg(value_name = "MODE")]
    mode: String,

    /// Directory containing the source contracts
    #[arg(short, long, default_value = "contracts", value_name = "PATH")]
    source: PathBuf,

    /// Root directory for the documents/, test/ and integration/ folders
    #[arg(short, long, default_value = ".", value_name = "PATH")]
    out_root: PathBuf,

    /// Suffix source file names must end with
    #[arg(long, default_value = ".sol")]
    suffix: String,

    /// Glob pattern for source file names to skip (can be used multiple times)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Model identifier
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(short, long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Maximum tokens to generate per file
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Timeout for each completion call, in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_name = "SECS")]
    timeout: u64,

    /// OpenAI-compatible API base URL
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// API key for the completion endpoint
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Continue with the remaining files when one fails
    #[arg(short, long)]
    keep_going: bool,

    /// Number of files to process at once (0 = one per CPU)
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Keep existing output files instead of overwriting them
    #[arg(long)]
    no_overwrite: bool,

    /// Render prompts only (no API calls, no files written)
    #[arg(long)]
    dry_run: bool,

    /// Path to a Tera template replacing the mode's built-in prompt
    ///
    /// The template receives the contract source as `topic`.
    ///
    /// Example: sol-scribe document --template ./audit.tera
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(cli.verbose) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(report) => {
            if report.has_failures() {
                eprintln!(
                    "warning: {} of {} files failed (see log above)",
                    report.failed, report.collected
                );
            }
            println!("{}", report.completion_message());
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e),
    }
}

fn run(cli: Cli) -> anyhow::Result<RunReport> {
    let verbose = cli.verbose;
    let mode = cli.mode.clone();
    let config = build_config(cli).context("Failed to build configuration")?;

    let dispatcher = ModeDispatcher::new(config).context("Failed to create dispatcher")?;

    let token = dispatcher.cancellation_token();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted: finishing in-flight requests, no new files will be started");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let report = dispatcher.execute(&mode)?;

    if verbose > 0 {
        report.print_summary();
    }

    Ok(report)
}

fn build_config(cli: Cli) -> sol_scribe::Result<Config> {
    let mut builder = Config::builder()
        .source_dir(cli.source)
        .output_root(cli.out_root)
        .suffix(cli.suffix)
        .exclude_patterns(cli.exclude)
        .model(cli.model)
        .temperature(cli.temperature)
        .timeout(Duration::from_secs(cli.timeout))
        .jobs(cli.jobs)
        .dry_run(cli.dry_run);

    if cli.keep_going {
        builder = builder.failure_policy(FailurePolicy::Continue);
    }

    if cli.no_overwrite {
        builder = builder.overwrite(OverwritePolicy::Skip);
    }

    if let Some(tokens) = cli.max_tokens {
        builder = builder.max_tokens(tokens);
    }

    if let Some(endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint);
    }

    if let Some(key) = cli.api_key {
        builder = builder.api_key(key);
    }

    if let Some(template) = cli.template {
        builder = builder.template_path(template);
    }

    if let Some(report) = cli.report {
        builder = builder.report_path(report);
    }

    builder.build()
}

/// Prints a one-line diagnostic and maps the error to an exit status.
fn report_error(error: &anyhow::Error) -> ExitCode {
    let Some(inner) = error.chain().find_map(|e| e.downcast_ref::<Error>()) else {
        eprintln!("error: {error:#}");
        return ExitCode::FAILURE;
    };

    eprintln!("error [{}]: {error:#}", inner.stage());

    if matches!(inner, Error::InvalidMode { .. }) {
        eprintln!("{}", Cli::command().render_usage());
    }

    ExitCode::from(inner.exit_code())
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbosity {
        0 => EnvFilter::new("sol_scribe=info"),
        1 => EnvFilter::new("sol_scribe=debug"),
        _ => EnvFilter::new("sol_scribe=trace"),
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
