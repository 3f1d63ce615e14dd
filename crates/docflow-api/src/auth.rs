//! Bearer-or-proxy-header auth middleware (SPEC_FULL.md §6). Applied to every
//! `/api/v1` route; `/health` and the swagger UI sit outside it.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, StatusCode> {
    let settings = state.engine.settings();

    let proxy_header_present = request
        .headers()
        .get(&settings.api_auth_proxy_header)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.is_empty());
    if proxy_header_present {
        return Ok(next.run(request).await);
    }

    match &settings.api_auth_token {
        None => Ok(next.run(request).await),
        Some(expected) => {
            let bearer_ok = request
                .headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected);
            if bearer_ok {
                Ok(next.run(request).await)
            } else {
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}
