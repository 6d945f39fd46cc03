//! # Reaper Agent
//!
//! High-performance policy enforcement service. Bootstrap logic, state,
//! handlers, and the router live in `lib.rs`; this binary just wires
//! them to a real listener.

use reaper_agent::{bootstrap, build_router, AgentConfig};
use reaper_core::BUILD_INFO;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AgentConfig::from_env()?;
    info!("Starting Reaper Agent {}", BUILD_INFO);

    let state = bootstrap(&config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Reaper Agent listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
