use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::config::resolve_config_path;
use vigil::stream::StreamTarget;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Service log monitoring agent", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Follow a live log stream from an agent
    Tail {
        /// Agent address, e.g. ws://host:3000
        #[arg(long, default_value = "ws://127.0.0.1:3000")]
        server: String,
        /// Shared secret of the agent
        #[arg(long)]
        key: String,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        backlog: Option<usize>,
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
        /// Base reconnect delay; attempt n waits n times this
        #[arg(long, default_value_t = 3)]
        retry_delay_secs: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and validate the config
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            vigil::cli::run::run(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                vigil::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                let path = config_path.ok_or("config not found; use --config <path>")?;
                vigil::cli::config::validate(&path)?;
            }
        },
        Some(Commands::Tail {
            server,
            key,
            service,
            file,
            backlog,
            max_attempts,
            retry_delay_secs,
        }) => {
            let args = vigil::cli::tail::TailArgs {
                server,
                api_key: key,
                target: StreamTarget {
                    service,
                    file,
                    backlog,
                },
                max_attempts,
                retry_delay: Duration::from_secs(retry_delay_secs),
            };
            vigil::cli::tail::tail(args).await?;
        }
    }

    Ok(())
}
