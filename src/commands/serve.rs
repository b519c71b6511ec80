use std::net::SocketAddr;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::controllers::paste;
use crate::models::NewPaste;
use crate::reaper::ExpirationReaper;
use crate::store::DEFAULT_LIST_LIMIT;
use crate::types::api::{CreatedPaste, ListQuery};
use crate::App;

pub async fn run(app: App) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], app.config.port));
    let token = CancellationToken::new();

    let mut tasks = vec![ExpirationReaper::new(
        app.store.clone(),
        app.config.database.cleanup_period,
    )
    .spawn(token.child_token())];
    tasks.extend(app.rate_limits.get_pastes.spawn_sweepers(&token));
    tasks.extend(app.rate_limits.new_pastes.spawn_sweepers(&token));

    info!("listening on {addr}");
    axum::Server::bind(&addr)
        .serve(router(app).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    token.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            warn!("background task ended abnormally: {err}");
        }
    }

    Ok(())
}

/// Public API routes. Deleting a paste is only possible from the command line.
fn router(app: App) -> Router {
    let body_limit = app.config.limits.max_body_size;
    Router::new()
        .route("/api/pastes", get(list_pastes).post(create_paste))
        .route("/api/pastes/:id", get(get_paste).put(update_paste))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c, serving until killed: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn create_paste(
    State(app): State<App>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(new): Json<NewPaste>,
) -> crate::ApiResult<impl IntoResponse> {
    let paste = paste::create(&app, peer.ip(), new).await?;
    Ok((StatusCode::CREATED, Json(CreatedPaste::from(&paste))))
}

async fn list_pastes(
    State(app): State<App>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ListQuery>,
) -> crate::ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let pastes = paste::list(&app, peer.ip(), limit, offset).await?;
    Ok(Json(pastes))
}

async fn get_paste(
    State(app): State<App>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> crate::ApiResult<impl IntoResponse> {
    let paste = paste::fetch(&app, peer.ip(), &id).await?;
    Ok(Json(paste))
}

async fn update_paste(
    State(app): State<App>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
    Json(changes): Json<NewPaste>,
) -> crate::ApiResult<impl IntoResponse> {
    paste::update(&app, peer.ip(), &id, changes).await?;
    Ok(StatusCode::NO_CONTENT)
}
