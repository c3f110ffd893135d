use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Backend;
use crate::lyrics::LyricsManager;
use crate::server::command::{seconds_to_position, ControlCommand};

#[derive(Clone)]
struct WebState {
    backend: Arc<dyn Backend>,
    lyrics: LyricsManager,
}

#[derive(Debug, Deserialize)]
struct SeekRequest {
    /// 秒
    position: f64,
}

async fn run_command(state: &WebState, command: ControlCommand) -> StatusCode {
    command.execute(state.backend.as_ref()).await;
    StatusCode::OK
}

async fn play(State(state): State<WebState>) -> StatusCode {
    run_command(&state, ControlCommand::Play).await
}

async fn pause(State(state): State<WebState>) -> StatusCode {
    run_command(&state, ControlCommand::Pause).await
}

async fn toggle(State(state): State<WebState>) -> StatusCode {
    run_command(&state, ControlCommand::Toggle).await
}

async fn next(State(state): State<WebState>) -> StatusCode {
    run_command(&state, ControlCommand::Next).await
}

async fn prev(State(state): State<WebState>) -> StatusCode {
    run_command(&state, ControlCommand::Prev).await
}

async fn seek(State(state): State<WebState>, Json(request): Json<SeekRequest>) -> StatusCode {
    match seconds_to_position(request.position) {
        Some(position) => run_command(&state, ControlCommand::Seek(position)).await,
        None => StatusCode::BAD_REQUEST,
    }
}

async fn playback_state(State(state): State<WebState>) -> Response {
    match state.backend.current_state() {
        Some(current) => Json(current).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn lyrics(State(state): State<WebState>) -> Response {
    if state.backend.current_state().is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.lyrics.current() {
        Some(lines) => Json(lines.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// HTTP 接口路由
pub fn router(backend: Arc<dyn Backend>, manager: LyricsManager) -> Router {
    Router::new()
        .route("/playback/play", post(play))
        .route("/playback/pause", post(pause))
        .route("/playback/toggle", post(toggle))
        .route("/playback/next", post(next))
        .route("/playback/prev", post(prev))
        .route("/playback/seek", post(seek))
        .route("/playback/state", get(playback_state))
        .route("/lyrics", get(lyrics))
        .with_state(WebState {
            backend,
            lyrics: manager,
        })
}

/// 在已绑定的监听器上提供服务，直到 `token` 被取消
pub async fn serve(listener: TcpListener, router: Router, token: CancellationToken) -> Result<()> {
    info!("HTTP 接口监听: {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP 服务异常退出")
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法绑定 HTTP 端口 {}", addr))
}
