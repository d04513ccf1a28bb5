//! `POST /command`: one uniform command against one device.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::debug;

use brewgate_core::app::CommandDispatcher;
use brewgate_core::domain::{CommandReply, UnifiedCommand};

pub fn router(dispatcher: Arc<CommandDispatcher>) -> Router {
    Router::new()
        .route("/command", post(command).fallback(method_not_allowed))
        .with_state(dispatcher)
}

async fn command(
    State(dispatcher): State<Arc<CommandDispatcher>>,
    body: Result<Json<UnifiedCommand>, JsonRejection>,
) -> (StatusCode, Json<CommandReply>) {
    let Json(command) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection, "rejected command body");
            return (StatusCode::BAD_REQUEST, Json(CommandReply::fail("json")));
        }
    };

    let reply = dispatcher.dispatch(command).await;
    let status = if reply.ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(reply))
}

async fn method_not_allowed() -> (StatusCode, Json<CommandReply>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(CommandReply::fail("method")),
    )
}
