//! # Reaper Platform
//!
//! Policy administration and retention operations. Bootstrap logic,
//! state, handlers, and the router live in `lib.rs`; this binary just
//! wires them to a real listener.

use reaper_core::BUILD_INFO;
use reaper_platform::{bootstrap, build_router, PlatformConfig};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PlatformConfig::from_env()?;
    info!("Starting Reaper Platform {}", BUILD_INFO);

    let state = bootstrap(&config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("Reaper Platform listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
