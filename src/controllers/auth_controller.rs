use axum::Json;
use axum::extract::State;
use std::sync::Arc;

use crate::app_context::AppContext;
use crate::controllers::ok;
use crate::dtos::ApiResponse;
use crate::dtos::auth_dtos::{AuthCheckResponse, LoginRequest, LoginResponse};
use crate::errors::AppResult;

pub async fn login(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let token = context.auth.login(&request.username, &request.password)?;
    Ok(ok(LoginResponse { token }))
}

/// Sits behind the auth middleware; reaching it means the token is valid.
pub async fn check() -> Json<ApiResponse<AuthCheckResponse>> {
    ok(AuthCheckResponse {
        authenticated: true,
    })
}
