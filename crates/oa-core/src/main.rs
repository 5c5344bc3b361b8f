//! Observation Archive Core - scheduling, archiving and retention
//!
//! The main entry point for oa-core, handling:
//! - Scheduling new observation ranges into blocks
//! - Writing and uploading block archives
//! - Sweeping archived rows past retention
//! - Ledger status, archive audits and local archive inspection

use clap::{Args, Parser, Subcommand, ValueEnum};
use oa_common::{Error, MeasureType, StructuredError, SCHEMA_REVISION};
use oa_config::{load_settings, LoadedSettings, ValidationError};
use oa_core::audit::audit_archives;
use oa_core::exit_codes::ExitCode;
use oa_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LogConfig, LogContext, LogFormat,
    LogLevel, Stage,
};
use oa_core::output::{print_json, OutputFormat};
use oa_core::status::{inspect_archive, kind_status};
use oa_core::tasks::{self, Task, TaskContext, TaskOutcome};
use oa_core::log_event;
use oa_store::ObservationStore;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Observation Archive Core - move old observations into verified archives
#[derive(Parser)]
#[command(name = "oa-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to obsarchive.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the observation database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human or jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Carve unclaimed observations into pending blocks
    Schedule(ScheduleArgs),

    /// Write and upload archives for pending blocks
    Write(WriteArgs),

    /// Delete rows of verified, old-enough archived blocks
    Sweep(SweepArgs),

    /// Schedule, write and sweep with configured defaults
    Run(KindArgs),

    /// Summarize the block ledger
    Status(KindArgs),

    /// Re-verify stored archives without deleting anything
    Audit(AuditArgs),

    /// Verify a local archive file and print its manifest
    Inspect(InspectArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Print version information
    Version,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Cell,
    Wifi,
    All,
}

impl KindArg {
    fn kinds(self) -> Vec<MeasureType> {
        match self {
            KindArg::Cell => vec![MeasureType::Cell],
            KindArg::Wifi => vec![MeasureType::Wifi],
            KindArg::All => MeasureType::ALL.to_vec(),
        }
    }
}

#[derive(Args, Debug)]
struct KindArgs {
    /// Measure kind to operate on
    #[arg(long, value_enum, default_value = "all")]
    kind: KindArg,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    #[command(flatten)]
    kind: KindArgs,

    /// Observations per block (default: [schedule] batch)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    batch: Option<u32>,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[command(flatten)]
    kind: KindArgs,

    /// Maximum pending blocks per kind (default: [write] limit)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    limit: Option<u32>,

    /// Keep the local archive file after upload
    #[arg(long)]
    keep_local: bool,
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[command(flatten)]
    kind: KindArgs,

    /// Maximum uploaded blocks per kind (default: [sweep] batch)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    batch: Option<u32>,

    /// Minimum row age in days (default: [sweep] days_old)
    #[arg(long)]
    days_old: Option<u32>,
}

#[derive(Args, Debug)]
struct AuditArgs {
    #[command(flatten)]
    kind: KindArgs,

    /// Maximum blocks checked per kind
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    limit: u32,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Archive file to verify
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Validate the resolved configuration
    Validate,
}

// ============================================================================
// Entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let log = LogContext::new(generate_run_id(), get_host_id());

    let exit_code = match cli.command {
        Commands::Schedule(args) => run_schedule(&cli.global, &log, &args),
        Commands::Write(args) => run_write(&cli.global, &log, &args),
        Commands::Sweep(args) => run_sweep(&cli.global, &log, &args),
        Commands::Run(args) => run_pipeline(&cli.global, &log, &args),
        Commands::Status(args) => run_status(&cli.global, &log, &args),
        Commands::Audit(args) => run_audit(&cli.global, &log, &args),
        Commands::Inspect(args) => run_inspect(&cli.global, &log, &args),
        Commands::Config(args) => match args.command {
            ConfigCommands::Show => run_config_show(&cli.global, &log),
            ConfigCommands::Validate => run_config_validate(&cli.global, &log),
        },
        Commands::Version => print_version(&cli.global),
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Payload printed for the stage commands.
#[derive(Serialize)]
struct CommandReport<'a> {
    command: &'a str,
    run_id: &'a str,
    generated_at: String,
    exit_code: i32,
    exit_code_name: &'static str,
    outcomes: Vec<TaskOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<StructuredError>,
}

fn emit<T: Serialize>(value: &T) -> ExitCode {
    match print_json(value) {
        Ok(()) => ExitCode::Clean,
        Err(e) => {
            eprintln!("oa-core: cannot write output: {}", e);
            ExitCode::IoError
        }
    }
}

fn load(global: &GlobalOpts, log: &LogContext) -> Result<LoadedSettings, ExitCode> {
    match load_settings(global.config.as_deref()) {
        Ok(mut loaded) => {
            if let Some(db) = &global.db {
                loaded.settings.database.path = db.clone();
            }
            match &loaded.path {
                Some(path) => log_event!(
                    log,
                    DEBUG,
                    event_names::CONFIG_LOADED,
                    Stage::Init,
                    "Configuration loaded",
                    path = path.display().to_string().as_str(),
                    source = loaded.source.to_string().as_str()
                ),
                None => log_event!(
                    log,
                    DEBUG,
                    event_names::CONFIG_DEFAULT_USED,
                    Stage::Init,
                    "No configuration file found; using defaults"
                ),
            }
            Ok(loaded)
        }
        Err(e) => Err(output_config_error(log, &e)),
    }
}

fn output_config_error(log: &LogContext, err: &ValidationError) -> ExitCode {
    log_event!(
        log,
        ERROR,
        event_names::CONFIG_ERROR,
        Stage::Init,
        err.to_string(),
        code = err.code()
    );
    let structured = StructuredError::from(&Error::Config(err.to_string()));
    eprintln!("{}", structured.to_json());
    ExitCode::ArgsError
}

fn output_error(log: &LogContext, command: &str, err: &Error) -> ExitCode {
    log_event!(
        log,
        ERROR,
        event_names::INTERNAL_ERROR,
        Stage::Init,
        err.to_string(),
        command = command,
        code = err.code()
    );
    eprintln!("{}", StructuredError::from(err).to_json());
    ExitCode::from_error(err)
}

fn summary_line(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Schedule {
            measure_type,
            ranges,
        } => match (ranges.first(), ranges.last()) {
            (Some(first), Some(last)) => format!(
                "schedule {}: {} blocks [{}, {})",
                measure_type,
                ranges.len(),
                first.start_id,
                last.end_id
            ),
            _ => format!("schedule {}: nothing to schedule", measure_type),
        },
        TaskOutcome::Write(r) => format!(
            "write {}: uploaded={} conflicts={} failed={}",
            r.measure_type,
            r.uploaded(),
            r.conflicts(),
            r.failed()
        ),
        TaskOutcome::Sweep(r) => format!(
            "sweep {}: archived={} rows_deleted={} skipped={} integrity_failures={} failed={}",
            r.measure_type,
            r.archived(),
            r.rows_deleted(),
            r.skipped(),
            r.integrity_failures(),
            r.failed()
        ),
    }
}

/// Run `tasks` in order. A task that cannot start skips the remaining tasks
/// of the same kind.
fn execute_tasks(
    global: &GlobalOpts,
    log: &LogContext,
    loaded: &LoadedSettings,
    command: &str,
    tasks: Vec<Task>,
) -> ExitCode {
    let mut ctx = match TaskContext::from_settings(&loaded.settings, log.clone()) {
        Ok(ctx) => ctx,
        Err(e) => return output_error(log, command, &e),
    };

    let mut exit = ExitCode::Clean;
    let mut outcomes = Vec::new();
    let mut errors = Vec::new();
    let mut stopped: Vec<MeasureType> = Vec::new();

    for task in tasks {
        let kind = task.kind();
        if stopped.contains(&kind) {
            continue;
        }
        match tasks::run(&mut ctx, task) {
            Ok(outcome) => {
                exit = exit.worst(outcome.exit_code());
                outcomes.push(outcome);
            }
            Err(e) => {
                exit = exit.worst(output_error(log, command, &e));
                errors.push(StructuredError::from(&e).with_context("measure_type", kind));
                stopped.push(kind);
            }
        }
    }

    let printed = match global.format {
        OutputFormat::Json => emit(&CommandReport {
            command,
            run_id: &log.run_id,
            generated_at: chrono::Utc::now().to_rfc3339(),
            exit_code: exit.as_i32(),
            exit_code_name: exit.code_name(),
            outcomes,
            errors,
        }),
        OutputFormat::Summary => {
            for outcome in &outcomes {
                println!("{}", summary_line(outcome));
            }
            ExitCode::Clean
        }
    };
    exit.worst(printed)
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_schedule(global: &GlobalOpts, log: &LogContext, args: &ScheduleArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let batch = args.batch.unwrap_or(loaded.settings.schedule.batch);
    let tasks = args
        .kind
        .kind
        .kinds()
        .into_iter()
        .map(|kind| Task::Schedule { kind, batch })
        .collect();
    execute_tasks(global, log, &loaded, "schedule", tasks)
}

fn run_write(global: &GlobalOpts, log: &LogContext, args: &WriteArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let limit = args.limit.unwrap_or(loaded.settings.write.limit);
    let cleanup_local_file = loaded.settings.archive.cleanup_local_file && !args.keep_local;
    let tasks = args
        .kind
        .kind
        .kinds()
        .into_iter()
        .map(|kind| Task::Write {
            kind,
            limit,
            cleanup_local_file,
        })
        .collect();
    execute_tasks(global, log, &loaded, "write", tasks)
}

fn run_sweep(global: &GlobalOpts, log: &LogContext, args: &SweepArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let batch = args.batch.unwrap_or(loaded.settings.sweep.batch);
    let days_old = args.days_old.unwrap_or(loaded.settings.sweep.days_old);
    let tasks = args
        .kind
        .kind
        .kinds()
        .into_iter()
        .map(|kind| Task::Sweep {
            kind,
            batch,
            days_old,
        })
        .collect();
    execute_tasks(global, log, &loaded, "sweep", tasks)
}

fn run_pipeline(global: &GlobalOpts, log: &LogContext, args: &KindArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let tasks = args
        .kind
        .kinds()
        .into_iter()
        .flat_map(|kind| Task::pipeline(kind, &loaded.settings))
        .collect();
    execute_tasks(global, log, &loaded, "run", tasks)
}

fn run_status(global: &GlobalOpts, log: &LogContext, args: &KindArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let db = &loaded.settings.database;
    let store = match ObservationStore::open(&db.path, Duration::from_millis(db.busy_timeout_ms))
    {
        Ok(store) => store,
        Err(e) => return output_error(log, "status", &e.into()),
    };

    let mut kinds = Vec::new();
    for kind in args.kind.kinds() {
        match kind_status(&store, kind) {
            Ok(status) => kinds.push(status),
            Err(e) => return output_error(log, "status", &e),
        }
    }

    match global.format {
        OutputFormat::Json => emit(&serde_json::json!({
            "command": "status",
            "run_id": &log.run_id,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "database": db.path.display().to_string(),
            "kinds": kinds,
        })),
        OutputFormat::Summary => {
            for s in &kinds {
                println!(
                    "{}: pending={} uploaded={} archived={} live={} unscheduled={}",
                    s.measure_type,
                    s.pending_blocks,
                    s.uploaded_blocks,
                    s.archived_blocks,
                    s.live_observations,
                    s.unscheduled_observations
                );
            }
            ExitCode::Clean
        }
    }
}

fn run_audit(global: &GlobalOpts, log: &LogContext, args: &AuditArgs) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    let mut ctx = match TaskContext::from_settings(&loaded.settings, log.clone()) {
        Ok(ctx) => ctx,
        Err(e) => return output_error(log, "audit", &e),
    };

    let mut exit = ExitCode::Clean;
    let mut reports = Vec::new();
    for kind in args.kind.kind.kinds() {
        match audit_archives(&ctx.store, ctx.archive.as_ref(), kind, args.limit) {
            Ok(report) => {
                ctx.monitor.record_audit(&report);
                if report.mismatches() > 0 {
                    exit = exit.worst(ExitCode::IntegrityFailure);
                } else if report.missing() > 0 || report.errors() > 0 {
                    exit = exit.worst(ExitCode::PartialFail);
                }
                reports.push(report);
            }
            Err(e) => return output_error(log, "audit", &e),
        }
    }
    ctx.monitor.persist();

    let printed = match global.format {
        OutputFormat::Json => emit(&serde_json::json!({
            "command": "audit",
            "run_id": &log.run_id,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "exit_code": exit.as_i32(),
            "reports": reports,
        })),
        OutputFormat::Summary => {
            for r in &reports {
                println!(
                    "audit {}: verified={} missing={} mismatches={} errors={}",
                    r.measure_type,
                    r.verified(),
                    r.missing(),
                    r.mismatches(),
                    r.errors()
                );
            }
            ExitCode::Clean
        }
    };
    exit.worst(printed)
}

fn run_inspect(global: &GlobalOpts, log: &LogContext, args: &InspectArgs) -> ExitCode {
    let report = match inspect_archive(&args.path) {
        Ok(report) => report,
        Err(e) => return output_error(log, "inspect", &e),
    };
    match global.format {
        OutputFormat::Json => emit(&report),
        OutputFormat::Summary => {
            println!(
                "{}: {} {} rows={} sha256={}",
                report.path.display(),
                report.manifest.measure_type,
                report.manifest.range,
                report.summary.row_count,
                report.sha256
            );
            ExitCode::Clean
        }
    }
}

fn run_config_show(global: &GlobalOpts, log: &LogContext) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    match global.format {
        OutputFormat::Json => emit(&serde_json::json!({
            "source": loaded.source.to_string(),
            "path": loaded.path.as_ref().map(|p| p.display().to_string()),
            "settings": &loaded.settings,
        })),
        OutputFormat::Summary => match loaded.settings.to_toml() {
            Ok(text) => {
                print!("{}", text);
                ExitCode::Clean
            }
            Err(e) => output_config_error(log, &e),
        },
    }
}

fn run_config_validate(global: &GlobalOpts, log: &LogContext) -> ExitCode {
    let loaded = match load(global, log) {
        Ok(l) => l,
        Err(code) => return code,
    };
    match global.format {
        OutputFormat::Json => emit(&serde_json::json!({
            "valid": true,
            "source": loaded.source.to_string(),
            "path": loaded.path.as_ref().map(|p| p.display().to_string()),
        })),
        OutputFormat::Summary => {
            println!("configuration ok ({})", loaded.source);
            ExitCode::Clean
        }
    }
}

fn print_version(global: &GlobalOpts) -> ExitCode {
    match global.format {
        OutputFormat::Json => emit(&serde_json::json!({
            "name": "oa-core",
            "version": env!("CARGO_PKG_VERSION"),
            "schema_revision": SCHEMA_REVISION,
            "archive_format_version": oa_bundle::ARCHIVE_FORMAT_VERSION,
        })),
        OutputFormat::Summary => {
            println!("oa-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::Clean
        }
    }
}
