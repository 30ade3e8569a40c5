use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::matchmaking::routes as matchmaking_routes;
use crate::moderation::{ban, kick};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the rate limiter keys on the peer address.
pub fn build_router(state: AppState) -> Result<Router, Box<dyn std::error::Error>> {
    // 100 requests per minute per IP on the listing API
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_millisecond(600) // 1 token every 600ms = 100 per minute
            .burst_size(100)
            .finish()
            .ok_or("invalid rate limiter configuration")?,
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Authenticated API (Claims extractor validates the bearer token)
    let api_routes = Router::new()
        .route(
            "/api/matchmaking/{room_id}/instances",
            axum::routing::get(matchmaking_routes::list_public_instances),
        )
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Developer-only moderation
    let moderation_routes = Router::new()
        .route("/api/moderation/kick", axum::routing::post(kick::kick_user))
        .route("/api/moderation/ban", axum::routing::post(ban::ban_user));

    // Gateway endpoints; authentication happens on the first frame
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::legacy_upgrade))
        .route(
            "/messaging-gateway",
            axum::routing::get(ws_handler::v1_upgrade),
        )
        .route("/ws-v2", axum::routing::get(ws_handler::v2_upgrade));

    let health = Router::new()
        .route("/", axum::routing::get(ping))
        .route("/health", axum::routing::get(health_check));

    Ok(Router::new()
        .merge(api_routes)
        .merge(moderation_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state))
}

async fn ping() -> &'static str {
    "Pong!"
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
