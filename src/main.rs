use chat_relay::db;
use chat_relay::hot_cache::RedisRestCache;
use chat_relay::llm_wrapper::LLMClient;
use chat_relay::relay::Relay;
use chat_relay::routes;
use chat_relay::settings::Settings;
use chat_relay::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    init_logging(settings.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "chat relay starting");

    let db_client = db::DatabaseClient::new(&settings.database).await?;
    // The relay degrades to upstream-only when the store is unreachable.
    if let Err(e) = db_client.ensure_index().await {
        error!("Failed to prepare index {}: {}", settings.database.index, e);
    }
    let store: Arc<dyn db::PromptStore> = Arc::new(db_client);

    let upstream = Arc::new(LLMClient::new(&settings.llm)?);

    let mut relay = Relay::new(store.clone(), upstream, settings.matching.clone());
    if let Some(cache_settings) = &settings.hot_cache {
        info!("hot cache enabled");
        relay = relay.with_hot_cache(Arc::new(RedisRestCache::new(cache_settings)));
    }

    let state = Arc::new(
        AppState::new(Arc::new(relay), store)
            .with_auth_token(settings.auth_token.clone())
            .with_cors_origins(settings.cors_origins.clone()),
    );
    if state.auth_token.is_none() {
        warn!("AUTH_TOKEN not set; chat routes are open");
    }

    let app = routes::build(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    info!("OpenAPI document: http://localhost:{}/docs/openapi.json", settings.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chat relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
