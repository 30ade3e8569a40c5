use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use cvr_server::config::{generate_config_template, Config};
use cvr_server::{auth, db, matchmaking, routes, shutdown, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cvr_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("CVR server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let jwt_secret =
        auth::jwt::load_or_generate_jwt_secret(&config.data_dir, config.jwt_secret.as_deref())?;

    let mut app_state = state::AppState::new(
        db,
        jwt_secret,
        config.matchmaking.settings(),
        config.economy.daily_reward,
    );
    app_state.keepalive = config.gateway.keepalive();
    app_state.audit.install_panic_hook();

    let reaper = matchmaking::reaper::spawn_instance_reaper(
        app_state.instances.clone(),
        config.matchmaking.reaper_interval_secs,
    );

    let instances = app_state.instances.clone();
    let audit = app_state.audit.clone();
    let app = routes::build_router(app_state)?;

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    audit.record(format!("Server started on {addr}")).await;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::guarded_shutdown_signal(instances))
    .await?;

    reaper.abort();
    audit.record("Server stopped").await;
    tracing::info!("CVR server stopped");

    Ok(())
}
