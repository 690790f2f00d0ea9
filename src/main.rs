use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use docuchat::core::logging;
use docuchat::server::router::router;
use docuchat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    if !state.providers.has_any_provider() {
        tracing::warn!(
            "no provider API keys configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY"
        );
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let app: Router = router(state);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
