use std::sync::Arc;

use anyhow::Context;

mod config;
mod extract;
mod gemini;
mod models;
mod routes;

use config::Config;
use gemini::{GeminiClient, GenerativeModel};
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let model: Option<Arc<dyn GenerativeModel>> = match config.gemini_api_key.as_deref() {
        Some(key) => {
            let client = GeminiClient::new(key, &config.gemini_model, &config.gemini_base_url)?;
            tracing::info!(model = client.model(), "Gemini client ready");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; extraction requests will fail");
            None
        }
    };

    let app = routes::router(AppState { model }, config.cors.clone(), config.index_html.clone());

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("failed to bind {}", config.addr()))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
