use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Form, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{Span, field, info, instrument, warn};

use ovpn_panel_core::credentials::Role;
use ovpn_panel_core::distribution;
use ovpn_panel_core::registry::ClientEntry;
use ovpn_panel_core::server_info::{ServerInfo, server_info};
use ovpn_panel_core::session::now_secs;

use crate::auth::{self, CurrentUser};
use crate::error::ApiError;
use crate::pages;
use crate::state::AppState;

/// Run blocking core work (file I/O, subprocesses, hashing) off the runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(v) = HeaderValue::from_str(cookie) {
        response.headers_mut().insert(header::SET_COOKIE, v);
    }
    response
}

fn success(message: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": message }))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// `GET /login`
pub async fn login_page() -> Html<String> {
    Html(pages::login(None))
}

/// `POST /login`
#[instrument(skip_all, fields(username = %form.username.trim()))]
pub async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let username = form.username.trim().to_string();
    let password = form.password.trim().to_string();

    let store = state.credentials.clone();
    let user = username.clone();
    let valid = blocking(move || store.verify(&user, &password)).await?;
    if !valid {
        warn!("login failed");
        return Ok(Html(pages::login(Some("Invalid username or password"))).into_response());
    }

    let id = state.sessions.login(&username, now_secs());
    Ok(with_cookie(
        Redirect::to("/").into_response(),
        &auth::session_cookie(&id, state.secure_cookie),
    ))
}

/// `GET /logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(id) = auth::session_id(&headers) {
        state.sessions.logout(&id);
    }
    with_cookie(
        Redirect::to("/login").into_response(),
        &auth::clear_cookie(state.secure_cookie),
    )
}

async fn load_server_info(state: &AppState) -> Result<ServerInfo, ApiError> {
    let layout = state.clients.layout().clone();
    let unit = state.service_unit.clone();
    let lookup = state.lookup.clone();
    blocking(move || server_info(&layout, &unit, lookup.as_ref())).await
}

/// `GET /`
#[instrument(skip_all, fields(user = %user.0))]
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Html<String>, ApiError> {
    let info = load_server_info(&state).await?;
    let clients = state.clients.clone();
    let store = state.credentials.clone();
    let name = user.0.clone();
    let (list, is_admin) = blocking(move || (clients.list(), store.is_admin(&name))).await?;
    Ok(Html(pages::dashboard(&user.0, is_admin, &info, &list)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SettingsForm {
    pub action: String,
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
    pub username: String,
    pub password: String,
}

/// `GET /settings` (admin only)
pub async fn settings_page(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let store = state.credentials.clone();
    let users = blocking(move || store.is_admin(&user.0).then(|| store.load())).await?;
    Ok(match users {
        Some(users) => Html(pages::settings(&users, None, None)).into_response(),
        None => Redirect::to("/").into_response(),
    })
}

/// `POST /settings` (admin only)
#[instrument(skip_all, fields(user = %user.0, action = %form.action))]
pub async fn settings_submit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Form(form): Form<SettingsForm>,
) -> Result<Response, ApiError> {
    let store = state.credentials.clone();
    let rendered = blocking(move || {
        if !store.is_admin(&user.0) {
            return None;
        }
        let outcome = match form.action.as_str() {
            "change_password" => store
                .change_password(
                    &user.0,
                    &form.old_password,
                    &form.new_password,
                    &form.confirm_password,
                )
                .map(|()| "Password changed successfully".to_string()),
            "add_user" => store
                .add_user(&form.username, &form.password, Role::User)
                .map(|()| format!("User {} created successfully", form.username.trim())),
            _ => Err(ovpn_panel_core::Error::validation("Unknown action")),
        };
        let users = store.load();
        Some(match outcome {
            Ok(message) => pages::settings(&users, Some(&message), None),
            Err(e) => pages::settings(&users, None, Some(&e.to_string())),
        })
    })
    .await?;

    Ok(match rendered {
        Some(html) => Html(html).into_response(),
        None => Redirect::to("/").into_response(),
    })
}

/// `GET /api/clients`
pub async fn api_clients(
    State(state): State<AppState>,
) -> Result<Json<Vec<ClientEntry>>, ApiError> {
    let clients = state.clients.clone();
    Ok(Json(blocking(move || clients.list()).await?))
}

#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub name: String,
    pub server_address: Option<String>,
}

/// Body of the client endpoints. Malformed JSON is a 400 with the usual error shape.
type ClientBody = Result<Json<ClientRequest>, JsonRejection>;

impl ClientRequest {
    fn parse(body: ClientBody) -> Result<Self, ApiError> {
        let Json(req) = body?;
        Span::current().record("client", req.name.as_str());
        Ok(req)
    }

    fn address(&self) -> Option<String> {
        self.server_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(ToString::to_string)
    }
}

/// `POST /api/client/create`
#[instrument(skip_all, fields(user = %user.0, client = field::Empty))]
pub async fn api_create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: ClientBody,
) -> Result<Json<Value>, ApiError> {
    let req = ClientRequest::parse(body)?;
    let clients = state.clients.clone();
    let address = req.address();
    blocking(move || clients.create(&req.name, address.as_deref())).await??;
    info!("client created");
    Ok(success("Client created successfully"))
}

/// `POST /api/client/revoke`
#[instrument(skip_all, fields(user = %user.0, client = field::Empty))]
pub async fn api_revoke(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: ClientBody,
) -> Result<Json<Value>, ApiError> {
    let req = ClientRequest::parse(body)?;
    let clients = state.clients.clone();
    blocking(move || clients.revoke(&req.name)).await??;
    info!("client revoked");
    Ok(success("Client revoked successfully"))
}

/// `POST /api/client/regenerate`
#[instrument(skip_all, fields(user = %user.0, client = field::Empty))]
pub async fn api_regenerate(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    body: ClientBody,
) -> Result<Json<Value>, ApiError> {
    let req = ClientRequest::parse(body)?;
    let clients = state.clients.clone();
    let address = req.address();
    blocking(move || clients.regenerate(&req.name, address.as_deref())).await??;
    Ok(success("Configuration regenerated"))
}

/// `POST /api/crl/regenerate` (admin only)
#[instrument(skip_all, fields(user = %user.0))]
pub async fn api_regenerate_crl(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Value>, ApiError> {
    let clients = state.clients.clone();
    let store = state.credentials.clone();
    blocking(move || {
        if !store.is_admin(&user.0) {
            return Err(ApiError::new(StatusCode::FORBIDDEN, "Admin access required"));
        }
        clients.regenerate_crl().map_err(ApiError::from)
    })
    .await??;
    Ok(success("CRL regenerated"))
}

/// `GET /api/client/download/{name}`
pub async fn api_download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let layout = state.clients.layout().clone();
    let download = blocking(move || distribution::download(&layout, &name)).await??;
    let disposition = format!("attachment; filename=\"{}\"", download.filename);
    Ok((
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    )
        .into_response())
}

/// `GET /api/client/qr/{name}`
pub async fn api_qr(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let layout = state.clients.layout().clone();
    let uri = blocking(move || distribution::render_scannable(&layout, &name))
        .await?
        .map_err(|e| {
            warn!(error = %e, "QR code unavailable");
            ApiError::internal("Could not generate QR code")
        })?;
    Ok(Json(json!({ "qr_code": uri })))
}

/// `GET /api/server/info`
pub async fn api_server_info(
    State(state): State<AppState>,
) -> Result<Json<ServerInfo>, ApiError> {
    Ok(Json(load_server_info(&state).await?))
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(dashboard))
        .route("/settings", get(settings_page).post(settings_submit))
        .route("/api/clients", get(api_clients))
        .route("/api/client/create", post(api_create))
        .route("/api/client/revoke", post(api_revoke))
        .route("/api/client/regenerate", post(api_regenerate))
        .route("/api/client/download/{name}", get(api_download))
        .route("/api/client/qr/{name}", get(api_qr))
        .route("/api/crl/regenerate", post(api_regenerate_crl))
        .route("/api/server/info", get(api_server_info))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", get(logout))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
