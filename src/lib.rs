//! qdev-exporter: provision a Q Dev connection on the lake platform, run the
//! user-metrics collection pipeline, and export the collected metrics as
//! versioned JSON snapshots.
//!
//! The [`qdev`](Cli) binary is a thin layer over the library modules:
//!
//! - [`lake`]: REST client, provisioner, pipeline trigger and waiter
//! - [`metrics`]: read queries against the lake's Q Dev tables
//! - [`snapshot`]: snapshot assembly and file output
//! - [`config`]: TOML configuration with environment overrides

pub mod config;
pub mod lake;
pub mod metrics;
pub mod snapshot;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError, StoreBackend};
use crate::lake::{
    CancelToken, LakeClient, LakeError, PipelineStatus, PipelineWaiter, SystemClock, WaitOutcome,
    WaitPolicy, ensure_connection, trigger_metrics_pipeline,
};
use crate::metrics::validate::Severity;
use crate::metrics::{
    DateRange, LakeStore, MetricsError, MysqlStore, SqliteStore, TrendWindow, ValidateConfig,
    ValidationReport,
};
use crate::snapshot::{
    ExportRequest, OutputMode, Snapshot, SnapshotError, SnapshotWriter, WrittenFiles,
};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV: &str = "QDEV_LOG";

/// Default connection id for store-side commands.
const DEFAULT_CONNECTION_ID: i64 = 1;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "qdev",
    version,
    about = "Collect Q Dev usage metrics through the lake platform and export them as JSON \
             snapshots"
)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/qdev-exporter/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Machine-readable output on stdout, structured errors on stderr
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging (overridden by QDEV_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Show platform version, connections, pipelines and store onboarding state
    Status,

    /// Create the Q Dev connection, or reuse a matching one
    Setup {
        /// Run the platform's connection test afterwards
        #[arg(long)]
        test: bool,
    },

    /// Create and start a metrics collection pipeline
    Trigger {
        #[arg(long, value_name = "ID")]
        connection_id: i64,
        /// Pipeline name (default from config)
        #[arg(long)]
        name: Option<String>,
    },

    /// Poll a pipeline until it finishes (Ctrl+C cancels)
    Wait {
        pipeline_id: i64,
        /// Deadline in seconds (default from config)
        #[arg(long, value_name = "SECS")]
        max_wait: Option<u64>,
    },

    /// Export a metrics snapshot from the store
    Export {
        #[arg(long, value_name = "ID", default_value_t = DEFAULT_CONNECTION_ID)]
        connection_id: i64,
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        output: OutputArgs,
        /// Refuse to write when validation finds errors
        #[arg(long)]
        strict: bool,
        /// Read a SQLite mirror instead of the configured [store] database
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },

    /// Check the metrics invariants without writing anything
    Validate {
        #[arg(long, value_name = "ID", default_value_t = DEFAULT_CONNECTION_ID)]
        connection_id: i64,
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },

    /// Show one user's summary and daily rows
    User {
        user_id: String,
        #[arg(long, value_name = "ID", default_value_t = DEFAULT_CONNECTION_ID)]
        connection_id: i64,
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },

    /// Provision, trigger, wait, then export
    Run {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeArgs {
    /// First date included (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub start: Option<String>,
    /// Last date included (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub end: Option<String>,
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArgs {
    /// One file per section plus the complete dataset
    #[arg(long)]
    pub split: bool,
    /// Output directory (default from config)
    #[arg(long, value_name = "PATH")]
    pub output_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Structured CLI errors
// ---------------------------------------------------------------------------

/// Error surfaced by the binary: exit code plus a stable kind string.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

pub mod exit_code {
    pub const OTHER: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const VALIDATION: i32 = 3;
    pub const UNAVAILABLE: i32 = 4;
    pub const PIPELINE: i32 = 5;
    pub const WRITE: i32 = 6;
    pub const CANCELLED: i32 = 7;
}

impl CliError {
    fn new(code: i32, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            hint: None,
            retryable: false,
        }
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// `{"error": {...}}` as printed on stderr in JSON mode.
    pub fn to_json(&self) -> serde_json::Value {
        json!({ "error": self })
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}

impl From<LakeError> for CliError {
    fn from(err: LakeError) -> Self {
        let message = err.to_string();
        let retryable = err.is_retryable();
        let kind = err.kind();
        let base = match &err {
            LakeError::Validation { .. } => {
                CliError::new(exit_code::VALIDATION, kind, message).hint(
                    "check the [connection] settings or QDEV_ACCESS_KEY_ID / \
                     QDEV_SECRET_ACCESS_KEY",
                )
            }
            LakeError::RemoteUnavailable(_) => {
                CliError::new(exit_code::UNAVAILABLE, kind, message)
                    .hint("check lake.base_url or LAKE_BASE_URL and that the platform is running")
            }
            LakeError::PipelineTimeout { .. } => {
                CliError::new(exit_code::PIPELINE, kind, message).hint(
                    "raise pipeline.max_wait_secs or pass --max-wait; the pipeline may still \
                     finish",
                )
            }
            LakeError::Cancelled { .. } => CliError::new(exit_code::CANCELLED, kind, message),
            LakeError::Decode { .. } => CliError::new(exit_code::OTHER, kind, message),
        };
        base.retryable(retryable)
    }
}

impl From<MetricsError> for CliError {
    fn from(err: MetricsError) -> Self {
        let message = err.to_string();
        match &err {
            MetricsError::Query(_) => CliError::new(exit_code::VALIDATION, err.kind(), message),
            MetricsError::StoreUnavailable(_) => {
                CliError::new(exit_code::UNAVAILABLE, err.kind(), message)
                    .hint("check the [store] settings, QDEV_DB_HOST / QDEV_DB_PASSWORD, or --store")
                    .retryable(err.is_retryable())
            }
        }
    }
}

impl From<SnapshotError> for CliError {
    fn from(err: SnapshotError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        match err {
            SnapshotError::Request(source) => {
                let inner = CliError::from(source);
                CliError { message, ..inner }
            }
            SnapshotError::Assembly { source, .. } => {
                let inner = CliError::from(source);
                CliError { message, kind, ..inner }
            }
            SnapshotError::Write { .. } => CliError::new(exit_code::WRITE, kind, message)
                .hint("check that the output directory is writable"),
            SnapshotError::Read { .. } | SnapshotError::Serialize(_) => {
                CliError::new(exit_code::OTHER, kind, message)
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::new(exit_code::USAGE, err.kind(), err.to_string())
            .hint("fix the configuration file or pass --config")
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ParsedCli {
    pub cli: Cli,
}

/// Parse arguments. Help and version requests print and exit here.
pub fn parse_cli(raw_args: Vec<String>) -> Result<ParsedCli, CliError> {
    match Cli::try_parse_from(raw_args) {
        Ok(cli) => Ok(ParsedCli { cli }),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp
            | clap::error::ErrorKind::DisplayVersion
            | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => err.exit(),
            _ => Err(CliError::new(exit_code::USAGE, "usage", err.to_string().trim_end())),
        },
    }
}

/// Install the stderr subscriber. `QDEV_LOG` wins over `-v`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run_with_parsed(parsed: ParsedCli) -> Result<(), CliError> {
    let cli = parsed.cli;
    init_tracing(cli.verbose);
    let config = Config::load(cli.config.as_deref())?;
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Status => cmd_status(&config, &out),
        Commands::Setup { test } => cmd_setup(&config, test, &out),
        Commands::Trigger {
            connection_id,
            name,
        } => cmd_trigger(&config, connection_id, name.as_deref(), &out),
        Commands::Wait {
            pipeline_id,
            max_wait,
        } => cmd_wait(&config, pipeline_id, max_wait, &out),
        Commands::Export {
            connection_id,
            range,
            output,
            strict,
            store,
        } => cmd_export(&config, connection_id, &range, &output, strict, store, &out),
        Commands::Validate {
            connection_id,
            store,
        } => cmd_validate(&config, connection_id, store, &out),
        Commands::User {
            user_id,
            connection_id,
            store,
        } => cmd_user(&config, connection_id, &user_id, store, &out),
        Commands::Run {
            range,
            output,
            store,
        } => cmd_run(&config, &range, &output, store, &out),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

struct Output {
    json: bool,
}

impl Output {
    /// JSON document in `--json` mode, otherwise the human text.
    fn emit<T: Serialize>(
        &self,
        value: &T,
        human: impl FnOnce() -> String,
    ) -> Result<(), CliError> {
        if self.json {
            let text = serde_json::to_string_pretty(value)
                .map_err(|e| CliError::new(exit_code::OTHER, "serialize_error", e.to_string()))?;
            println!("{text}");
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn lake_client(config: &Config) -> Result<LakeClient, CliError> {
    Ok(LakeClient::new(&config.lake.base_url, config.lake_timeout())?)
}

/// `--store PATH` always reads a SQLite mirror; otherwise `[store]` decides.
fn store_for(config: &Config, flag: Option<PathBuf>) -> Result<LakeStore, CliError> {
    let store = match (flag, config.store.backend) {
        (Some(path), _) => LakeStore::Sqlite(SqliteStore::new(path)),
        (None, StoreBackend::Sqlite) => LakeStore::Sqlite(SqliteStore::new(&config.store.path)),
        (None, StoreBackend::Mysql) => LakeStore::Mysql(MysqlStore::new(config.mysql_settings())?),
    };
    debug!(store = %store.describe(), "metrics store selected");
    Ok(store)
}

fn cmd_status(config: &Config, out: &Output) -> Result<(), CliError> {
    let client = lake_client(config)?;
    let version = client.version()?;
    let connections = client.list_connections()?;
    let pipelines = client.list_pipelines()?;
    let onboard = client.store_onboard()?;

    let doc = json!({
        "base_url": client.base_url(),
        "version": version.version,
        "connections": connections,
        "pipelines": pipelines
            .iter()
            .map(|p| {
                json!({"id": p.id, "name": p.name, "status": p.status(), "raw_status": p.status})
            })
            .collect::<Vec<_>>(),
        "store_onboard": onboard,
    });
    out.emit(&doc, || {
        let mut lines = vec![
            format!("lake {} (version {})", client.base_url(), version.version),
            format!("connections: {}", connections.len()),
        ];
        lines.extend(connections.iter().map(|c| format!("  - #{} {}", c.id, c.name)));
        lines.push(format!("pipelines: {}", pipelines.len()));
        lines.extend(
            pipelines
                .iter()
                .map(|p| format!("  - #{} {} [{}]", p.id, p.name, p.status())),
        );
        lines.push(format!("store onboard: {onboard}"));
        lines.join("\n")
    })
}

fn cmd_setup(config: &Config, test: bool, out: &Output) -> Result<(), CliError> {
    let client = lake_client(config)?;
    let outcome = ensure_connection(
        &client,
        &config.connection_settings(),
        config.connection.match_by,
    )?;

    // A failed connection test is reported, not fatal.
    let test_result = if test {
        match client.test_connection(outcome.connection.id) {
            Ok(body) => Some(json!({"ok": true, "response": body})),
            Err(err) => {
                warn!(
                    connection_id = outcome.connection.id,
                    error = %err,
                    "connection test failed"
                );
                Some(json!({"ok": false, "error": err.to_string()}))
            }
        }
    } else {
        None
    };

    let doc = json!({
        "connection": outcome.connection,
        "created": outcome.created,
        "test": test_result,
    });
    out.emit(&doc, || {
        let verb = if outcome.created { "created" } else { "reusing" };
        let mut text = format!(
            "{verb} connection #{} ({})",
            outcome.connection.id, outcome.connection.name
        );
        if let Some(t) = &test_result {
            let ok = t["ok"].as_bool().unwrap_or(false);
            text.push_str(if ok {
                "\nconnection test: ok"
            } else {
                "\nconnection test: FAILED"
            });
        }
        text
    })
}

fn cmd_trigger(
    config: &Config,
    connection_id: i64,
    name: Option<&str>,
    out: &Output,
) -> Result<(), CliError> {
    let client = lake_client(config)?;
    let name = name.unwrap_or(&config.pipeline.name);
    let triggered = trigger_metrics_pipeline(&client, connection_id, Some(name))?;
    out.emit(&triggered, || {
        format!(
            "pipeline #{} '{}' started [{}]",
            triggered.id, triggered.name, triggered.status
        )
    })
}

/// Cancel token wired to Ctrl+C.
fn interrupt_token() -> Result<CancelToken, CliError> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).map_err(|e| {
        CliError::new(
            exit_code::OTHER,
            "signal_handler",
            format!("failed to install Ctrl+C handler: {e}"),
        )
    })?;
    Ok(token)
}

fn wait_for(
    client: &LakeClient,
    policy: WaitPolicy,
    pipeline_id: i64,
    cancel: &CancelToken,
) -> Result<WaitOutcome, CliError> {
    let clock = SystemClock::new();
    let outcome = PipelineWaiter::new(client, &clock, policy).wait(pipeline_id, cancel)?;
    if outcome.status == PipelineStatus::Failed {
        let detail = outcome
            .pipeline
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| outcome.pipeline.status.clone());
        return Err(CliError::new(
            exit_code::PIPELINE,
            "pipeline_failed",
            format!("pipeline {pipeline_id} failed: {detail}"),
        )
        .hint(
            "inspect the pipeline in the lake UI; re-run `qdev trigger` after fixing the \
             connection",
        ));
    }
    Ok(outcome)
}

fn wait_doc(outcome: &WaitOutcome) -> serde_json::Value {
    json!({
        "pipeline_id": outcome.pipeline.id,
        "status": outcome.status,
        "raw_status": outcome.pipeline.status,
        "polls": outcome.polls,
        "elapsed_secs": outcome.elapsed.as_secs(),
    })
}

fn cmd_wait(
    config: &Config,
    pipeline_id: i64,
    max_wait: Option<u64>,
    out: &Output,
) -> Result<(), CliError> {
    let mut policy = config.wait_policy();
    if let Some(secs) = max_wait {
        if secs == 0 {
            return Err(CliError::new(
                exit_code::USAGE,
                "usage",
                "--max-wait must be greater than zero",
            ));
        }
        policy = policy.with_deadline(Duration::from_secs(secs));
    }
    let client = lake_client(config)?;
    let cancel = interrupt_token()?;
    let outcome = wait_for(&client, policy, pipeline_id, &cancel)?;
    out.emit(&wait_doc(&outcome), || {
        format!(
            "pipeline #{} {} after {} polls ({}s)",
            pipeline_id,
            outcome.status,
            outcome.polls,
            outcome.elapsed.as_secs()
        )
    })
}

fn export_request(
    config: &Config,
    connection_id: i64,
    range: &RangeArgs,
) -> Result<ExportRequest, CliError> {
    let date_range = DateRange::parse(range.start.as_deref(), range.end.as_deref())?;
    let window = TrendWindow::trailing(config.export.trend_days)?;
    Ok(ExportRequest::new(connection_id)
        .date_range(date_range)
        .top_n(config.export.top_n)
        .trend_window(window))
}

fn write_snapshot(
    config: &Config,
    snapshot: &Snapshot,
    output: &OutputArgs,
) -> Result<WrittenFiles, CliError> {
    let dir = output
        .output_dir
        .clone()
        .unwrap_or_else(|| config.export.output_dir.clone());
    let mode = if output.split {
        OutputMode::Split
    } else {
        OutputMode::Combined
    };
    Ok(SnapshotWriter::new(dir)
        .pretty(config.export.pretty)
        .write(snapshot, mode)?)
}

fn strict_gate(report: &ValidationReport) -> Result<(), CliError> {
    let errors = report.count_failures(Severity::Error);
    if errors == 0 {
        return Ok(());
    }
    let ids: Vec<&str> = report
        .failures()
        .filter(|c| c.severity == Severity::Error)
        .map(|c| c.id.as_str())
        .collect();
    Err(CliError::new(
        exit_code::VALIDATION,
        "validation_failed",
        format!("{errors} validation check(s) failed: {}", ids.join(", ")),
    )
    .hint("run `qdev validate` for details"))
}

fn log_report(report: &ValidationReport) {
    for check in report.failures() {
        warn!(
            check = %check.id,
            severity = ?check.severity,
            details = %check.details,
            "validation check failed"
        );
    }
}

fn export_doc(snapshot: &Snapshot, written: &WrittenFiles) -> serde_json::Value {
    json!({
        "token": written.token,
        "files": written.files,
        "statistics": snapshot.statistics,
        "connection_id": snapshot.export_info.connection_id,
    })
}

fn export_human(snapshot: &Snapshot, written: &WrittenFiles) -> String {
    let mut lines = vec![format!(
        "exported {} users, {} daily records, {} trend days",
        snapshot.statistics.total_users,
        snapshot.statistics.total_daily_records,
        snapshot.statistics.date_range_days
    )];
    lines.extend(written.files.iter().map(|f| format!("  {}", f.display())));
    lines.join("\n")
}

fn cmd_export(
    config: &Config,
    connection_id: i64,
    range: &RangeArgs,
    output: &OutputArgs,
    strict: bool,
    store: Option<PathBuf>,
    out: &Output,
) -> Result<(), CliError> {
    let request = export_request(config, connection_id, range)?;
    let store = store_for(config, store)?;
    let snapshot = snapshot::assemble(&store, &request)?;

    let report = snapshot.validate(&ValidateConfig::default());
    log_report(&report);
    if strict {
        strict_gate(&report)?;
    }

    let written = write_snapshot(config, &snapshot, output)?;
    out.emit(&export_doc(&snapshot, &written), || export_human(&snapshot, &written))
}

fn cmd_validate(
    config: &Config,
    connection_id: i64,
    store: Option<PathBuf>,
    out: &Output,
) -> Result<(), CliError> {
    let request = export_request(config, connection_id, &RangeArgs::default())?;
    let store = store_for(config, store)?;
    let snapshot = snapshot::assemble(&store, &request)?;
    let report = snapshot.validate(&ValidateConfig::default());

    out.emit(&report, || {
        report
            .checks
            .iter()
            .map(|c| {
                let mark = if c.ok { "ok  " } else { "FAIL" };
                format!("[{mark}] {} ({:?}): {}", c.id, c.severity, c.details)
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    strict_gate(&report)
}

fn cmd_user(
    config: &Config,
    connection_id: i64,
    user_id: &str,
    store: Option<PathBuf>,
    out: &Output,
) -> Result<(), CliError> {
    let detail = store_for(config, store)?.user_detail(connection_id, user_id)?;
    out.emit(&detail, || {
        let mut lines = Vec::new();
        match &detail.user_summary {
            Some(s) => lines.push(format!(
                "{} ({}): {} suggestions, {} accepted, rate {:.2}",
                s.user_id,
                s.display_name.as_deref().unwrap_or("-"),
                s.total_inline_suggestions_count,
                s.total_inline_acceptance_count,
                s.acceptance_rate
            )),
            None => lines.push(format!("{user_id}: no summary row")),
        }
        lines.extend(detail.daily_data.iter().map(|d| {
            format!(
                "  {} {} suggestions, {} accepted",
                d.date, d.inline_suggestions_count, d.inline_acceptance_count
            )
        }));
        lines.join("\n")
    })
}

fn cmd_run(
    config: &Config,
    range: &RangeArgs,
    output: &OutputArgs,
    store: Option<PathBuf>,
    out: &Output,
) -> Result<(), CliError> {
    // Reject bad dates before touching the platform.
    DateRange::parse(range.start.as_deref(), range.end.as_deref())?;

    let client = lake_client(config)?;
    let provisioned = ensure_connection(
        &client,
        &config.connection_settings(),
        config.connection.match_by,
    )?;
    let connection_id = provisioned.connection.id;

    let triggered = trigger_metrics_pipeline(&client, connection_id, Some(&config.pipeline.name))?;
    let cancel = interrupt_token()?;
    let waited = wait_for(&client, config.wait_policy(), triggered.id, &cancel)?;
    info!(pipeline_id = triggered.id, "collection finished; exporting");

    let request = export_request(config, connection_id, range)?;
    let snapshot = snapshot::assemble(&store_for(config, store)?, &request)?;
    log_report(&snapshot.validate(&ValidateConfig::default()));
    let written = write_snapshot(config, &snapshot, output)?;

    let doc = json!({
        "connection": provisioned.connection,
        "connection_created": provisioned.created,
        "pipeline": wait_doc(&waited),
        "export": export_doc(&snapshot, &written),
    });
    out.emit(&doc, || {
        format!(
            "connection #{connection_id}, pipeline #{} {} in {}s\n{}",
            triggered.id,
            waited.status,
            waited.elapsed.as_secs(),
            export_human(&snapshot, &written)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).expect("parse")
    }

    #[test]
    fn export_flags_parse() {
        let cli = parse(&[
            "qdev", "export", "--start", "2024-01-01", "--end", "2024-01-07", "--split", "--strict",
            "--json",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Export {
                connection_id,
                range,
                output,
                strict,
                store,
            } => {
                assert_eq!(connection_id, 1);
                assert_eq!(range.start.as_deref(), Some("2024-01-01"));
                assert_eq!(range.end.as_deref(), Some("2024-01-07"));
                assert!(output.split);
                assert!(strict);
                assert_eq!(store, None);
            }
            other => panic!("expected export, got {other:?}"),
        }
    }

    #[test]
    fn wait_requires_pipeline_id() {
        assert!(Cli::try_parse_from(["qdev", "wait"]).is_err());
        let cli = parse(&["qdev", "wait", "42", "--max-wait", "60"]);
        assert_eq!(
            cli.command,
            Commands::Wait {
                pipeline_id: 42,
                max_wait: Some(60)
            }
        );
    }

    #[test]
    fn unknown_flag_is_usage_error() {
        let err = parse_cli(vec!["qdev".into(), "export".into(), "--bogus".into()]).unwrap_err();
        assert_eq!(err.code, exit_code::USAGE);
        assert_eq!(err.kind, "usage");
    }

    #[test]
    fn lake_errors_map_to_exit_codes() {
        let cases = [
            (
                LakeError::Validation {
                    status: 400,
                    message: "bad".into(),
                },
                exit_code::VALIDATION,
            ),
            (LakeError::RemoteUnavailable("down".into()), exit_code::UNAVAILABLE),
            (
                LakeError::PipelineTimeout {
                    pipeline_id: 1,
                    deadline: Duration::from_secs(5),
                },
                exit_code::PIPELINE,
            ),
            (LakeError::Cancelled { pipeline_id: 1 }, exit_code::CANCELLED),
        ];
        for (err, code) in cases {
            assert_eq!(CliError::from(err).code, code);
        }
        assert!(CliError::from(LakeError::RemoteUnavailable("x".into())).retryable);
    }

    #[test]
    fn assembly_error_inherits_source_code_but_keeps_section_message() {
        let err = SnapshotError::Assembly {
            section: snapshot::Section::DailyTrends,
            source: MetricsError::StoreUnavailable("locked".into()),
        };
        let cli = CliError::from(err);
        assert_eq!(cli.code, exit_code::UNAVAILABLE);
        assert_eq!(cli.kind, "snapshot_assembly_error");
        assert!(cli.message.contains("daily_trends"));
    }

    #[test]
    fn rejected_request_maps_like_query_error() {
        let err = SnapshotError::Request(MetricsError::Query("top_n must be at least 1".into()));
        let cli = CliError::from(err);
        assert_eq!(cli.code, exit_code::VALIDATION);
        assert_eq!(cli.kind, "query_error");
        assert!(!cli.retryable);
        assert!(cli.message.contains("top_n"));
    }

    #[test]
    fn store_flag_forces_sqlite() {
        let config = Config::default();
        let store = store_for(&config, Some(PathBuf::from("mirror.db"))).unwrap();
        assert!(matches!(store, LakeStore::Sqlite(_)));

        let store = store_for(&config, None).unwrap();
        assert!(matches!(store, LakeStore::Mysql(_)));

        let mut config = Config::default();
        config.store.backend = StoreBackend::Sqlite;
        config.store.path = PathBuf::from("local.db");
        let store = store_for(&config, None).unwrap();
        assert_eq!(store.describe(), "sqlite:local.db");
    }

    #[test]
    fn error_json_shape() {
        let err = CliError::from(MetricsError::Query("end before start".into()));
        let v = err.to_json();
        assert_eq!(v["error"]["code"], 3);
        assert_eq!(v["error"]["kind"], "query_error");
        assert_eq!(v["error"]["retryable"], false);
    }
}
