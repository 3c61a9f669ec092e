use anyhow::Context;
use tokio::net::TcpListener;

use support_rag::config::Config;
use support_rag::logging;
use support_rag::server::router::router;
use support_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init(&config.server.log_dir);

    let state = AppState::initialize(config)?;

    let bind_addr = format!("127.0.0.1:{}", state.config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let app = router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
