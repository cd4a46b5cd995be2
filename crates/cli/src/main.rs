use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{
    execute_call_command, execute_run_command, is_fatal, validate_guest_file, CallArgs, ConfigSource, LimitsPreset,
    RunArgs,
};

/// Exit code for a guest that broke the host calling protocol
const PROTOCOL_VIOLATION_EXIT_CODE: i32 = 10;

#[derive(Parser)]
#[command(name = "seqwasm")]
#[command(about = "Seqwasm - host runtime for sandboxed light-client guests")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Runtime configuration (JSON), defaults when omitted
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Resource limit preset, overrides the limits in `--config`
    #[arg(long, global = true, value_enum)]
    pub limits: Option<LimitsPreset>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a guest module without executing it
    Validate(ValidateArgs),
    /// Invoke a single entry point on a fresh store
    Call(CallCommandArgs),
    /// Run a JSON script of calls against one instance
    Run(RunCommandArgs),
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the guest module (.wasm or .wat)
    pub guest: String,
}

#[derive(Args)]
pub struct CallCommandArgs {
    /// Path to the guest module
    pub guest: String,
    /// Entry point or export name
    pub entry: String,
    /// Selector-stripped payload as hex
    #[arg(long, conflicts_with = "calldata")]
    pub payload: Option<String>,
    /// Full calldata as hex, the 4-byte selector is stripped
    #[arg(long)]
    pub calldata: Option<String>,
    /// Sender address (33 bytes hex)
    #[arg(long)]
    pub sender: Option<String>,
    /// Call timestamp in unix seconds, defaults to now
    #[arg(long)]
    pub timestamp: Option<i64>,
}

#[derive(Args)]
pub struct RunCommandArgs {
    /// Path to the guest module
    pub guest: String,
    /// Path to the JSON script
    pub script: String,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seqwasm=info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli) {
        eprintln!("Error: {:#}", e);
        if is_fatal(&e) {
            std::process::exit(PROTOCOL_VIOLATION_EXIT_CODE);
        }
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = ConfigSource {
        path: cli.config,
        limits: cli.limits,
    };
    match cli.command {
        Commands::Validate(args) => validate_guest_file(&args.guest, &config),
        Commands::Call(args) => execute_call_command(CallArgs {
            guest: args.guest,
            entry: args.entry,
            payload: args.payload,
            calldata: args.calldata,
            sender: args.sender,
            timestamp: args.timestamp,
            config,
        }),
        Commands::Run(args) => execute_run_command(RunArgs {
            guest: args.guest,
            script: args.script,
            config,
        }),
    }
}
