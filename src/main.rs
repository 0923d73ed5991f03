use asos_pipeline::cli::{run, Cli};
use asos_pipeline::error::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
