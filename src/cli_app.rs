//! Top-level CLI definition and dispatch.

use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use layerhash::backend::{OsBackend, SourceType, StorageBackend};
use layerhash::cli::PromptCredentials;
use layerhash::core::abort::AbortSignal;
use layerhash::core::config::{Config, OutputEncoding};
use layerhash::core::errors::LhError;
use layerhash::hasher::{HashSummary, HasherOptions, RecursiveHasher};
use layerhash::logger::jsonl::{EventType, JsonlConfig, LogEntry, Severity};
use layerhash::logger::{ActivityLog, Verbosity};
use layerhash::output::report::ScanReport;
use layerhash::output::{LineOutput, OutputWriter};
use layerhash::scanner::{
    ChainedCredentials, CredentialUnlocker, ScanContext, SourceScanner, StaticCredentials,
    VolumeScanner, VolumeUnlocker,
};

/// layerhash — hash every file in a directory, device or storage media image.
#[derive(Debug, Parser)]
#[command(
    name = "layerhash",
    author,
    version,
    about = "Layered storage discovery and recursive content hashing",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Append structured events to this JSONL file.
    #[arg(long, global = true, value_name = "PATH")]
    activity_log: Option<PathBuf>,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Hash every data stream below a source.
    Hash(HashArgs),
    /// Show the storage layers discovered in a source.
    Analyze(AnalyzeArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Credential options shared by `hash` and `analyze`.
#[derive(Debug, Clone, Args, Serialize, Default)]
struct CredentialArgs {
    /// Password to try on encrypted volumes (repeatable).
    #[arg(long = "password", value_name = "PASSWORD")]
    #[serde(skip)]
    passwords: Vec<String>,
    /// Recovery password to try on encrypted volumes (repeatable).
    #[arg(long = "recovery-password", value_name = "PASSWORD")]
    #[serde(skip)]
    recovery_passwords: Vec<String>,
    /// Never prompt for credentials.
    #[arg(long)]
    no_prompt: bool,
}

#[derive(Debug, Clone, Args, Serialize)]
struct HashArgs {
    /// Directory, file, device or storage media image.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Partitions to hash: "all", "none" or indices like "1,3..5".
    #[arg(long, value_name = "SELECTION")]
    partitions: Option<String>,
    /// Snapshots to hash: "all", "none" or indices like "2..3".
    #[arg(long, value_name = "SELECTION")]
    snapshots: Option<String>,
    /// Volumes to hash: "all", "none" or indices.
    #[arg(long, value_name = "SELECTION")]
    volumes: Option<String>,
    /// Write hash lines to this file instead of stdout.
    #[arg(long, value_name = "PATH")]
    output_file: Option<PathBuf>,
    /// Output encoding: utf-8 or ascii.
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    /// Read buffer size in bytes.
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,
    /// Number of streams hashed concurrently.
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Debug, Clone, Args, Serialize)]
struct AnalyzeArgs {
    /// Directory, file, device or storage media image.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Probe one layer per step and print every step.
    #[arg(long)]
    no_auto_recurse: bool,
    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration (secrets masked).
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation completed with skipped or unreadable parts.
    #[error("{0}")]
    Partial(String),
    /// Interrupted by the operator.
    #[error("aborted by user")]
    Aborted,
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
            Self::Aborted => 130,
        }
    }
}

impl From<LhError> for CliError {
    fn from(err: LhError) -> Self {
        match err {
            LhError::UserAbort => Self::Aborted,
            LhError::Runtime { .. } => Self::Internal(err.to_string()),
            err if err.is_fatal() => Self::User(err.to_string()),
            err => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Hash(args) => run_hash(cli, args),
        Command::Analyze(args) => run_analyze(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &cli.activity_log {
        config.paths.activity_log.clone_from(path);
        config.paths.activity_log_enabled = true;
    }
    Ok(config)
}

fn open_log(cli: &Cli, config: &Config) -> ActivityLog {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    let log = ActivityLog::new(verbosity);
    if config.paths.activity_log_enabled {
        log.with_jsonl(JsonlConfig::for_path(&config.paths.activity_log))
    } else {
        log
    }
}

fn apply_credential_args(config: &mut Config, args: &CredentialArgs) {
    config.credentials.passwords.extend(args.passwords.iter().cloned());
    config
        .credentials
        .recovery_passwords
        .extend(args.recovery_passwords.iter().cloned());
    if args.no_prompt {
        config.credentials.prompt = false;
    }
}

/// Configured credentials first, then the interactive prompt.
fn build_unlocker(config: &Config, abort: &AbortSignal) -> CredentialUnlocker<ChainedCredentials> {
    let mut chain = ChainedCredentials::new().with(StaticCredentials::from_config(&config.credentials));
    if config.credentials.prompt {
        chain = chain.with(PromptCredentials::new(abort.clone()));
    }
    CredentialUnlocker::new(chain)
}

fn source_path_spec(source: &std::path::Path) -> Result<layerhash::pathspec::PathSpec, CliError> {
    Ok(OsBackend::source_path_spec(source)?)
}

// ---------------------------------------------------------------------------
// hash
// ---------------------------------------------------------------------------

fn run_hash(cli: &Cli, args: &HashArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    apply_hash_args(&mut config, args)?;
    config.validate()?;

    let log = open_log(cli, &config);
    let abort = AbortSignal::with_os_signals();
    log.record(
        &LogEntry::new(EventType::RunStart, Severity::Info)
            .with_path(args.source.to_string_lossy())
            .with_details(format!("config {}", config.stable_hash()?)),
    );

    let outcome = hash_source(&config, args, &log, &abort);
    log.flush();
    match outcome {
        Ok(summary) => report_hash_summary(cli, &summary),
        Err(CliError::Aborted) => {
            emit_status(cli, "Aborted.", &json!({"command": "hash", "status": "aborted"}))?;
            Err(CliError::Aborted)
        }
        Err(err) => Err(err),
    }
}

fn apply_hash_args(config: &mut Config, args: &HashArgs) -> Result<(), CliError> {
    if let Some(partitions) = &args.partitions {
        config.selection.partitions.clone_from(partitions);
    }
    if let Some(snapshots) = &args.snapshots {
        config.selection.snapshots.clone_from(snapshots);
    }
    if let Some(volumes) = &args.volumes {
        config.selection.volumes.clone_from(volumes);
    }
    if let Some(encoding) = &args.encoding {
        config.output.encoding = encoding.parse::<OutputEncoding>()?;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.hasher.read_buffer_size = buffer_size;
    }
    if let Some(parallelism) = args.parallelism {
        config.hasher.parallelism = parallelism;
    }
    apply_credential_args(config, &args.credentials);
    Ok(())
}

fn hash_source(
    config: &Config,
    args: &HashArgs,
    log: &ActivityLog,
    abort: &AbortSignal,
) -> Result<HashSummary, CliError> {
    let backend = OsBackend::new();
    let source = source_path_spec(&args.source)?;
    let policy = config.selection.policy()?;

    let mut unlocker = build_unlocker(config, abort);
    let volumes = VolumeScanner::new(SourceScanner::new(&backend, log), policy)
        .with_auto_recurse(config.scanner.auto_recurse);
    let (ctx, base_path_specs) = volumes.scan_source(source, &mut unlocker)?;
    if base_path_specs.is_empty() {
        return Err(CliError::Partial(format!(
            "no file system to hash in {} ({} locked volume(s))",
            args.source.display(),
            ctx.locked_scan_nodes().count()
        )));
    }

    let writer = match &args.output_file {
        Some(path) => OutputWriter::create(path)?,
        None => OutputWriter::stdout(),
    };
    let mut output = LineOutput::new(writer, config.output.encoding, log);
    let hasher = RecursiveHasher::new(&backend, log, HasherOptions::from_config(&config.hasher))
        .with_abort(abort.clone());
    Ok(hasher.process(&base_path_specs, &mut output)?)
}

fn report_hash_summary(cli: &Cli, summary: &HashSummary) -> Result<(), CliError> {
    let payload = json!({
        "command": "hash",
        "status": if summary.is_partial() { "partial" } else { "completed" },
        "summary": serde_json::to_value(summary)?,
    });
    emit_status(cli, "Completed.", &payload)?;

    if summary.is_partial() {
        return Err(CliError::Partial(format!(
            "{} unreadable stream(s), {} abandoned subtree(s), {} skipped file system(s)",
            summary.unreadable_streams, summary.abandoned_subtrees, summary.skipped_base_path_specs
        )));
    }
    Ok(())
}

/// Status goes to stderr; stdout may carry hash lines.
fn emit_status(cli: &Cli, message: &str, payload: &Value) -> Result<(), CliError> {
    let mut stderr = io::stderr().lock();
    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                let styled = if message.starts_with("Aborted") {
                    message.yellow()
                } else {
                    message.green()
                };
                writeln!(stderr, "{styled}")?;
            }
        }
        OutputMode::Json => {
            serde_json::to_writer(&mut stderr, payload)?;
            writeln!(stderr)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

fn run_analyze(cli: &Cli, args: &AnalyzeArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    apply_credential_args(&mut config, &args.credentials);
    if args.no_auto_recurse {
        config.scanner.auto_recurse = false;
    }

    let log = open_log(cli, &config);
    let abort = AbortSignal::with_os_signals();
    let backend = OsBackend::new();
    let scanner = SourceScanner::new(&backend, &log);
    let source = source_path_spec(&args.source)?;
    let mut unlocker = build_unlocker(&config, &abort);
    let mode = output_mode(cli);
    let auto_recurse = config.scanner.auto_recurse;

    let emit = |ctx: &ScanContext, step: Option<u64>| -> Result<(), CliError> {
        let mut report = ScanReport::from_context(ctx, Some(&backend as &dyn StorageBackend));
        if let Some(step) = step {
            report = report.with_scan_step(step);
        }
        match mode {
            OutputMode::Human => {
                print!("{}", report.render_text());
                Ok(())
            }
            OutputMode::Json => write_json_line(&serde_json::to_value(&report)?),
        }
    };

    let outcome = analyze_source(&scanner, source, auto_recurse, &mut unlocker, &emit);
    log.flush();
    match outcome {
        Ok(()) => emit_status(cli, "Completed.", &json!({"command": "analyze", "status": "completed"})),
        Err(CliError::Aborted) => {
            emit_status(cli, "Aborted.", &json!({"command": "analyze", "status": "aborted"}))?;
            Err(CliError::Aborted)
        }
        Err(err) => Err(err),
    }
}

/// Scan until nothing changes, offering every locked node to `unlocker`
/// once. Without auto-recursion every step is reported; otherwise only the
/// final tree.
fn analyze_source(
    scanner: &SourceScanner<'_>,
    source: layerhash::pathspec::PathSpec,
    auto_recurse: bool,
    unlocker: &mut dyn VolumeUnlocker,
    emit: &dyn Fn(&ScanContext, Option<u64>) -> Result<(), CliError>,
) -> Result<(), CliError> {
    let mut ctx = ScanContext::new(source);
    let mut focus = None;
    let mut step = 0u64;
    let mut attempted = HashSet::new();

    loop {
        scanner.scan(&mut ctx, auto_recurse, focus)?;
        if !ctx.updated() {
            break;
        }
        if !auto_recurse {
            emit(&ctx, Some(step))?;
        }
        step += 1;

        if ctx.source_type().is_some_and(SourceType::is_plain) {
            break;
        }

        let locked: Vec<_> = ctx
            .locked_scan_nodes()
            .filter(|&id| attempted.insert(id))
            .collect();
        for id in locked {
            unlocker.unlock(scanner, &mut ctx, id)?;
        }

        if !auto_recurse {
            match ctx.unscanned_node() {
                Some(id) => focus = Some(id),
                None => return Ok(()),
            }
        }
    }

    if auto_recurse {
        emit(&ctx, None)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?.redacted();

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match load_config(cli) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "source": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(err) => {
                if output_mode(cli) == OutputMode::Json {
                    let payload = json!({
                        "command": "config validate",
                        "valid": false,
                        "error": err.to_string(),
                    });
                    write_json_line(&payload)?;
                }
                Err(err)
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        _ => OutputMode::Human,
    }
}
