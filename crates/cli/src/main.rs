use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "stopguard")]
#[command(about = "Stop-loss lifecycle manager for Binance USD-M futures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stop-loss maintenance service
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// List open positions from storage
    Positions {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run { config } => {
            commands::run::run(&config).await?;
        }
        Commands::Positions { config } => {
            commands::positions::run(&config).await?;
        }
    }

    Ok(())
}
