use tracing::{error, info};

mod answer;
mod ask;
mod auth;
mod chat;
mod config;
mod entity;
mod error;
mod server;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Parley backend starting...");

    let config = config::Config::from_env()?;

    info!("Initializing store at {}", config.database_path.display());
    let store = store::Store::new(&config.database_path).await?;
    store.init().await?;

    let answers = answer::AnswerClient::new(config.answer_service_url.clone());
    info!("Using answer service at {}", answers.url());

    let state = server::AppState {
        auth: auth::AuthService::new(store.clone(), &config.jwt),
        asker: ask::Asker::new(store.clone(), answers),
        store,
    };
    let app = server::ApiServer::new(state).router();

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Backend server listening on {}", address);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
