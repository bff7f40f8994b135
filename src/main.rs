mod cli;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    imposter_store::logger::init_logger();

    let cli = Cli::parse();
    cli::run(cli).await
}
