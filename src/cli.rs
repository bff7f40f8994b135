use clap::{Parser, Subcommand};
use imposter_store::{ImposterRepository, RepositoryConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Inspect a filesystem-backed imposter data directory", long_about = None)]
pub struct Cli {
    /// Data directory to inspect. Defaults to IMPOSTER_STORE_DATADIR, then `.imposters`.
    #[arg(long, global = true)]
    pub datadir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the number of stubs configured on an imposter
    Count { port: u16 },

    /// Print the materialized imposter (header fields plus stub responses) as JSON
    Show { port: u16 },

    /// Drop saved proxy responses for an imposter, keeping the rest
    Gc { port: u16 },
}

fn config(datadir: Option<String>) -> RepositoryConfig {
    match datadir {
        Some(dir) => RepositoryConfig::new(dir),
        None => RepositoryConfig::from_env(),
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let repo = ImposterRepository::new(config(cli.datadir));

    match cli.command {
        Commands::Count { port } => {
            let stubs = repo.stubs_for(port);
            let count = stubs.count().await?;
            info!(port, count, "counted stubs");
            println!("{count}");
        }
        Commands::Show { port } => match repo.get(port).await? {
            Some(imposter) => println!("{}", serde_json::to_string_pretty(&imposter)?),
            None => anyhow::bail!("no imposter found on port {port}"),
        },
        Commands::Gc { port } => {
            repo.stubs_for(port).delete_saved_proxy_responses().await?;
            info!(port, "cleared saved proxy responses");
        }
    }
    Ok(())
}
