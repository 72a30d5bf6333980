use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use riverbed::app::AppContext;
use riverbed::cli::{commands, Cli, Commands};
use riverbed::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let ctx = AppContext::new(config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run(&ctx).await?,
        Commands::ReadAll => {
            commands::read_all(&ctx).await?;
        }
        Commands::BuildRivers => {
            commands::build_rivers(&ctx).await?;
        }
        Commands::Renew { url } => {
            commands::renew(&ctx, &url).await?;
        }
        Commands::Stats => {
            commands::stats(&ctx)?;
        }
    }

    Ok(())
}
