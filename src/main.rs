use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use genai_summarizer::{
    config::Config,
    api::routes::create_router,
    llm::GeminiClient,
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genai_summarizer=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let server_addr = config.server_addr;

    let model = GeminiClient::new(
        &config.gemini_api_base,
        &config.gemini_api_key,
        &config.gemini_model,
    )?;
    info!(model = model.model(), data_dir = %config.data_dir.display(), "Starting summarizer");

    let app_state = AppState::new(config, Arc::new(model));
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    info!(%server_addr, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
