use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::errors::AppError;

/// Bearer-token guard for the authenticated API surface. Accepts the
/// Authorization header or a `token` query parameter (browsers cannot set
/// headers on <img> and WebSocket requests).
pub async fn require_auth(
    State(context): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&request).or_else(|| query_token(&request));
    let Some(token) = token else {
        return AppError::unauthorized("missing credentials").into_response();
    };
    match context.auth.verify(&token) {
        Ok(_) => next.run(request).await,
        Err(error) => error.into_response(),
    }
}

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
}

pub fn query_token(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .map(|raw| urlencoding::decode(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
    })
}
