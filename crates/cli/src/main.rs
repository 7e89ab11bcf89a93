mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    spokehub_config::SpokehubConfig,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "spokehub", version, about = "spokehub: agent communication hub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching `./` and the config dir.
    #[arg(long, global = true, env = "SPOKEHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true, env = "SPOKEHUB_PORT")]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub (default when no subcommand is provided).
    Serve,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (or discovery), then `SPOKEHUB_*` env overrides, then flags.
fn effective_config(cli: &Cli) -> anyhow::Result<SpokehubConfig> {
    let config = match &cli.config {
        Some(path) => spokehub_config::load_config(path)?,
        None => spokehub_config::discover_and_load(),
    };
    let mut config = spokehub_config::apply_env_overrides(config);
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command.take() {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "spokehub starting");
            let config = effective_config(&cli)?;
            if config.admission.allowed_origins.is_empty()
                && config.admission.mode == spokehub_config::AdmissionMode::Permissive
            {
                warn!("no allowed origins configured; accepting spokes from any origin");
            }
            spokehub_gateway::start_gateway(config).await
        },
        Some(Commands::Config { action }) => {
            let config = effective_config(&cli)?;
            config_commands::handle_config(action, cli.config.as_deref(), &config)
        },
    }
}
