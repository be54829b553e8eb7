//! Command-line surface for the Maestro CLI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use maestro_config::{CredentialStore, FileCredentialStore};
use maestro_telemetry::{LogFormat, LoggingConfig, build_sha, init_logging, level_for_verbosity};
use tracing::debug;
use uuid::Uuid;

use crate::client::{AppContext, CliDependencies, CliResult, DEFAULT_TIMEOUT_SECS};
use crate::commands::login::{DEFAULT_CALLBACK_ADDR, handle_login};
use crate::commands::operations::{handle_get_operation, handle_get_operations};
use crate::commands::progress::handle_progress;
use crate::commands::scheduler::{handle_cancel, handle_rollback, handle_status};

const DEFAULT_CONTEXT: &str = "prod";
/// Commit the binary was built from; set `MAESTRO_BUILD_SHA` at compile time.
const BUILD_SHA: &str = match option_env!("MAESTRO_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Parses CLI arguments, installs logging, executes the requested command,
/// and returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: level_for_verbosity(cli.verbose),
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        build_sha: BUILD_SHA,
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }

    let trace_id = Uuid::new_v4().to_string();
    let deps = match CliDependencies::new(cli.timeout, &trace_id) {
        Ok(deps) => deps,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };

    debug!(
        command = command_label(&cli.command),
        trace_id = %trace_id,
        version = env!("CARGO_PKG_VERSION"),
        build = build_sha(),
        "dispatching command"
    );

    match dispatch(cli, &deps).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli, deps: &CliDependencies) -> CliResult<()> {
    let store: Arc<dyn CredentialStore> = match cli.config_dir {
        Some(dir) => Arc::new(FileCredentialStore::new(dir)),
        None => Arc::new(FileCredentialStore::from_home()?),
    };

    let ctx = AppContext {
        client: deps.client.clone(),
        context: cli.context,
        store,
    };

    match cli.command {
        Command::Login(args) => handle_login(&ctx, args).await,
        Command::Progress(args) => handle_progress(&ctx, args).await,
        Command::Rollback(args) => handle_rollback(&ctx, args).await,
        Command::Cancel(args) => handle_cancel(&ctx, args).await,
        Command::Get(GetCommand::Operations(args)) => handle_get_operations(&ctx, args).await,
        Command::Get(GetCommand::Operation(args)) => handle_get_operation(&ctx, args).await,
        Command::Status(args) => handle_status(&ctx, args).await,
    }
}

fn parse_log_format(input: &str) -> Result<LogFormat, String> {
    input.parse::<LogFormat>().map_err(|err| err.to_string())
}

#[derive(Parser)]
#[command(name = "maestro", about = "Command-line client for the Maestro scheduler control plane")]
struct Cli {
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "MAESTRO_CONTEXT",
        default_value = DEFAULT_CONTEXT,
        help = "Credential context to use"
    )]
    context: String,
    #[arg(
        long,
        global = true,
        env = "MAESTRO_CONFIG_DIR",
        help = "Directory holding credential files (defaults to ~/.maestro)"
    )]
    config_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "MAESTRO_HTTP_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    timeout: u64,
    #[arg(
        short = 'v',
        long,
        global = true,
        value_parser = clap::value_parser!(u8).range(0..=3),
        help = "Log verbosity: 0 error, 1 warn, 2 info (default), 3 debug"
    )]
    verbose: Option<u8>,
    #[arg(long, global = true, value_parser = parse_log_format, help = "Log format: pretty or json")]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to a Maestro server and store the credential for the context.
    Login(LoginArgs),
    /// Follow the progress of an operation until it finishes.
    Progress(ProgressArgs),
    /// Roll a scheduler back to a previous version.
    Rollback(RollbackArgs),
    /// Cancel a running operation.
    Cancel(CancelArgs),
    #[command(subcommand)]
    Get(GetCommand),
    /// Show the status of a scheduler.
    Status(StatusArgs),
}

#[derive(Subcommand)]
enum GetCommand {
    /// List every operation of a scheduler.
    Operations(GetOperationsArgs),
    /// Show a single operation of a scheduler.
    Operation(GetOperationArgs),
}

#[derive(Args)]
pub(crate) struct LoginArgs {
    #[arg(help = "Base URL of the Maestro server")]
    pub(crate) server_url: String,
    #[arg(
        long,
        env = "MAESTRO_CALLBACK_ADDR",
        default_value = DEFAULT_CALLBACK_ADDR,
        help = "Local address receiving the login redirect"
    )]
    pub(crate) listen: String,
}

#[derive(Args)]
pub(crate) struct ProgressArgs {
    #[arg(help = "Operation key returned by a mutating command")]
    pub(crate) operation_key: String,
    #[arg(long, help = "Give up after this many seconds")]
    pub(crate) deadline_secs: Option<u64>,
}

#[derive(Args)]
pub(crate) struct RollbackArgs {
    pub(crate) scheduler: String,
    pub(crate) version: String,
    #[arg(long, help = "Print the operation key without waiting for completion")]
    pub(crate) no_wait: bool,
    #[arg(long, help = "Give up waiting after this many seconds")]
    pub(crate) deadline_secs: Option<u64>,
}

#[derive(Args)]
pub(crate) struct CancelArgs {
    pub(crate) operation_key: String,
}

#[derive(Args)]
pub(crate) struct StatusArgs {
    pub(crate) scheduler: String,
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub(crate) struct OperationColumns {
    #[arg(short = 'i', long = "input", help = "Show operation input")]
    pub(crate) input: bool,
    #[arg(short = 'x', long = "execution-history", help = "Show operation execution history")]
    pub(crate) execution_history: bool,
}

#[derive(Args)]
pub(crate) struct GetOperationsArgs {
    pub(crate) scheduler: String,
    #[command(flatten)]
    pub(crate) columns: OperationColumns,
}

#[derive(Args)]
pub(crate) struct GetOperationArgs {
    pub(crate) scheduler: String,
    pub(crate) operation_id: String,
    #[command(flatten)]
    pub(crate) columns: OperationColumns,
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Login(_) => "login",
        Command::Progress(_) => "progress",
        Command::Rollback(_) => "rollback",
        Command::Cancel(_) => "cancel",
        Command::Get(GetCommand::Operations(_)) => "get_operations",
        Command::Get(GetCommand::Operation(_)) => "get_operation",
        Command::Status(_) => "status",
    }
}
