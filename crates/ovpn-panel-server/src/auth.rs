//! Session cookie handling and the authentication middleware.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use ovpn_panel_core::session::{AuthError, SessionId, now_secs};

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "ovpn_panel_session";

/// Username of the authenticated caller, set by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// Extract the session id from the `Cookie` header(s).
pub fn session_id(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then(|| SessionId::from(value))
        })
}

pub fn session_cookie(id: &SessionId, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{SESSION_COOKIE}={}; HttpOnly{secure}; SameSite=Strict; Path=/",
        id.as_str()
    )
}

pub fn clear_cookie(secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}=; HttpOnly{secure}; SameSite=Strict; Path=/; Max-Age=0")
}

/// Reject requests without a live session.
///
/// Pages redirect to `/login`; `/api/*` gets a 401 JSON body. A valid
/// session is refreshed and its user attached as [`CurrentUser`].
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = session_id(request.headers())
        .ok_or(AuthError::NoSession)
        .and_then(|id| state.sessions.authorize(&id, now_secs()));

    match outcome {
        Ok(session) => {
            request
                .extensions_mut()
                .insert(CurrentUser(session.username));
            next.run(request).await
        }
        Err(reason) => {
            tracing::debug!(path = %request.uri().path(), %reason, "unauthenticated request");
            let mut response = if request.uri().path().starts_with("/api/") {
                ApiError::new(StatusCode::UNAUTHORIZED, AuthError::NoSession.to_string())
                    .into_response()
            } else {
                Redirect::to("/login").into_response()
            };
            if reason == AuthError::Expired
                && let Ok(v) = HeaderValue::from_str(&clear_cookie(state.secure_cookie))
            {
                response.headers_mut().insert(header::SET_COOKIE, v);
            }
            response
        }
    }
}
