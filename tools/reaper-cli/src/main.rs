//! Thin entry point: `lib.rs` owns argument parsing, URL building, and
//! command dispatch so integration tests can drive it without a subprocess.

use clap::Parser;
use reaper_cli::{run, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
