//! kbsync CLI: keeps a local store of Ecuadorian provinces, national parks,
//! heritage sites and plazas in sync with Wikidata and DBpedia.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
