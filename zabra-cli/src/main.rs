use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use zabra_core::config::built_in_config;
use zabra_core::{load_config, ConfigOverrides, ZabraConfig};
use zabra_runner::CommandRunner;

/// Exit status for any failed subcommand (the historical `exit(-1)`).
const FAILURE_EXIT_CODE: u8 = 255;

#[derive(Parser)]
#[command(name = "zabra")]
#[command(about = "CLI for patching github repos")]
#[command(
    long_about = "zabra is a command line interface for cloning and patching a set of github repos"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Server entry point (currently performs no work)
    Server,

    /// Run an external command, killing it if it exceeds the timeout
    Run {
        /// Timeout in seconds (defaults to runner.timeout_secs)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the completion report as JSON
        #[arg(long)]
        json: bool,

        /// Program followed by its arguments
        #[arg(
            required = true,
            value_name = "PROGRAM",
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },

    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(FAILURE_EXIT_CODE)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<u8> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(0);
    };

    let timeout_override = match &command {
        Commands::Run { timeout, .. } => *timeout,
        _ => None,
    };
    let loaded = load_config(&ConfigOverrides {
        config: cli.config,
        timeout_secs: timeout_override,
    });
    let config = resolve_config(&command, loaded)?;
    debug!(config = ?config, "Resolved configuration");

    match command {
        Commands::Server => Ok(server(&config)),
        Commands::Run { json, command, .. } => {
            let Some((program, args)) = command.split_first() else {
                anyhow::bail!("No program given to run");
            };
            run(&config, program, args, json).await?;
            Ok(0)
        }
        Commands::Config => {
            print!("{}", toml::to_string(&config)?);
            Ok(0)
        }
    }
}

/// The server stub never fails on configuration; other subcommands do.
fn resolve_config(
    command: &Commands,
    loaded: zabra_core::Result<ZabraConfig>,
) -> anyhow::Result<ZabraConfig> {
    match loaded {
        Ok(config) => Ok(config),
        Err(e) if matches!(command, Commands::Server) => {
            warn!(error = %e, "Ignoring invalid zabra configuration");
            Ok(built_in_config())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to load zabra configuration")),
    }
}

/// Placeholder: resets the exit code and returns it.
fn server(config: &ZabraConfig) -> u8 {
    let exit_code = 0;
    info!(config = %config.config.display(), "Server command invoked; nothing to serve");
    exit_code
}

async fn run(
    config: &ZabraConfig,
    program: &str,
    args: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let runner = CommandRunner::new().with_default_timeout(config.runner.timeout());
    let invocation = runner.invocation(program, args);

    let report = runner.run(&invocation).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
