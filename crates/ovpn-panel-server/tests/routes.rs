#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use ovpn_panel_core::PanelConfig;
use ovpn_panel_core::bundle::FixedAddress;
use ovpn_panel_core::ca::{CaError, CertificateAuthority, PkiLayout};
use ovpn_panel_core::credentials::{CredentialStore, Role};
use ovpn_panel_server::{AppState, build_router};

/// Produces the files Easy-RSA would, without running anything.
struct FakeCa {
    pki: PkiLayout,
}

impl CertificateAuthority for FakeCa {
    fn create_request(&self, name: &str) -> Result<(), CaError> {
        std::fs::write(self.pki.private_key(name), format!("KEY {name}\n")).unwrap();
        Ok(())
    }

    fn sign_request(&self, name: &str) -> Result<(), CaError> {
        std::fs::write(self.pki.issued_cert(name), format!("CERT {name}\n")).unwrap();
        Ok(())
    }

    fn revoke(&self, name: &str) -> Result<(), CaError> {
        std::fs::remove_file(self.pki.issued_cert(name)).unwrap();
        Ok(())
    }

    fn regenerate_revocation_list(&self) -> Result<(), CaError> {
        std::fs::write(self.pki.root().join("crl.pem"), "CRL\n").unwrap();
        Ok(())
    }
}

struct Panel {
    _dir: tempfile::TempDir,
    app: axum::Router,
    config: PanelConfig,
}

fn panel() -> Panel {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = PanelConfig {
        openvpn_dir: root.join("openvpn"),
        clients_dir: root.join("clients"),
        service_unit: "ovpn-panel-test-no-such-unit".into(),
        ..PanelConfig::default()
    };
    let layout = config.layout();
    std::fs::create_dir_all(layout.pki.issued_dir()).unwrap();
    std::fs::create_dir_all(layout.pki.private_dir()).unwrap();
    std::fs::write(layout.pki.ca_cert(), "CA\n").unwrap();
    std::fs::write(layout.pki.issued_cert("server"), "SERVER\n").unwrap();
    std::fs::write(&layout.tls_auth_key, "TA\n").unwrap();
    std::fs::write(&layout.server_conf, "port 443\nproto tcp\n").unwrap();

    let store = CredentialStore::new(&layout.users_file);
    store.add_user("admin", "admin-pw", Role::Admin).unwrap();
    store.add_user("viewer", "viewer-pw", Role::User).unwrap();

    let state = AppState::new(
        &config,
        Arc::new(FakeCa {
            pki: layout.pki.clone(),
        }),
        Arc::new(FixedAddress("203.0.113.20".into())),
    );
    Panel {
        _dir: dir,
        app: build_router(state),
        config,
    }
}

struct Reply {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: String,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }
}

async fn send(app: &axum::Router, req: Request<Body>) -> Reply {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(c) = cookie {
        builder = builder.header(header::COOKIE, c);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, cookie: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(c) = cookie {
        builder = builder.header(header::COOKIE, c);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Log in and return the `name=value` cookie pair.
async fn login(app: &axum::Router, user: &str, password: &str) -> String {
    let reply = send(
        app,
        post_form(
            "/login",
            None,
            &format!("username={user}&password={password}"),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/");
    let cookie = reply
        .headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn pages_redirect_to_login_without_session() {
    let p = panel();
    let reply = send(&p.app, get("/", None)).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/login");
}

#[tokio::test]
async fn api_requires_session() {
    let p = panel();
    let reply = send(&p.app, get("/api/clients", None)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json()["success"], false);
    assert_eq!(reply.json()["error"], "Authentication required");

    let reply = send(
        &p.app,
        get("/api/clients", Some("ovpn_panel_session=forged")),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_render_error() {
    let p = panel();
    let reply = send(
        &p.app,
        post_form("/login", None, "username=admin&password=wrong"),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("Invalid username or password"));
    assert!(reply.headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn login_cookie_is_locked_down() {
    let p = panel();
    let reply = send(
        &p.app,
        post_form("/login", None, "username=admin&password=admin-pw"),
    )
    .await;
    let cookie = reply
        .headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    for attr in ["HttpOnly", "Secure", "SameSite=Strict", "Path=/"] {
        assert!(cookie.contains(attr), "{cookie} lacks {attr}");
    }
}

#[tokio::test]
async fn dashboard_shows_server_info() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;
    let reply = send(&p.app, get("/", Some(&cookie))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("203.0.113.20"));
    assert!(reply.body.contains("443"));

    let info = send(&p.app, get("/api/server/info", Some(&cookie))).await.json();
    assert_eq!(info["ip"], "203.0.113.20");
    assert_eq!(info["port"], 443);
    assert_eq!(info["status"], "Stopped");
}

#[tokio::test]
async fn client_lifecycle() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;

    let reply = send(
        &p.app,
        post_json("/api/client/create", &cookie, r#"{"name":"alice"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    assert_eq!(reply.json()["success"], true);

    let list = send(&p.app, get("/api/clients", Some(&cookie))).await.json();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "alice");
    assert_eq!(list[0]["config_exists"], true);

    let download = send(&p.app, get("/api/client/download/alice", Some(&cookie))).await;
    assert_eq!(download.status, StatusCode::OK);
    assert_eq!(
        download.headers.get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"alice.ovpn\""
    );
    assert_eq!(
        download.headers.get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert!(download.body.contains("remote 203.0.113.20 443"));
    assert!(download.body.contains("proto tcp"));

    let qr = send(&p.app, get("/api/client/qr/alice", Some(&cookie))).await;
    assert_eq!(qr.status, StatusCode::OK);
    assert!(
        qr.json()["qr_code"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,")
    );

    let reply = send(
        &p.app,
        post_json("/api/client/revoke", &cookie, r#"{"name":"alice"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);

    let download = send(&p.app, get("/api/client/download/alice", Some(&cookie))).await;
    assert_eq!(download.status, StatusCode::NOT_FOUND);
    assert!(!p.config.layout().bundle_path("alice").exists());
}

#[tokio::test]
async fn create_rejects_bad_and_duplicate_names() {
    let p = panel();
    let cookie = login(&p.app, "viewer", "viewer-pw").await;

    let reply = send(
        &p.app,
        post_json("/api/client/create", &cookie, r#"{"name":"../etc"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "Invalid client name");

    send(
        &p.app,
        post_json("/api/client/create", &cookie, r#"{"name":"bob"}"#),
    )
    .await;
    let reply = send(
        &p.app,
        post_json("/api/client/create", &cookie, r#"{"name":"bob"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "Client already exists");
}

#[tokio::test]
async fn malformed_client_bodies_get_json_errors() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;

    for (uri, body) in [
        ("/api/client/create", r#"{"name": 5}"#),
        ("/api/client/create", r#"{"name":"#),
        ("/api/client/revoke", "not json"),
        ("/api/client/regenerate", r#"{"name": ["x"]}"#),
    ] {
        let reply = send(&p.app, post_json(uri, &cookie, body)).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{uri} {body}");
        assert_eq!(reply.json()["success"], false);
        assert_eq!(reply.json()["error"], "Invalid request body");
    }
    let issued = std::fs::read_dir(p.config.layout().pki.issued_dir()).unwrap();
    assert_eq!(issued.count(), 1);
}

#[tokio::test]
async fn revoke_unknown_client_is_404() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;
    let reply = send(
        &p.app,
        post_json("/api/client/revoke", &cookie, r#"{"name":"ghost"}"#),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["success"], false);
}

#[tokio::test]
async fn regenerate_applies_new_address() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;
    send(
        &p.app,
        post_json("/api/client/create", &cookie, r#"{"name":"carol"}"#),
    )
    .await;

    let reply = send(
        &p.app,
        post_json(
            "/api/client/regenerate",
            &cookie,
            r#"{"name":"carol","server_address":"vpn.example.net"}"#,
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let bundle = std::fs::read_to_string(p.config.layout().bundle_path("carol")).unwrap();
    assert!(bundle.contains("remote vpn.example.net 443"));
}

#[tokio::test]
async fn qr_for_missing_bundle_is_generic_failure() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;
    let reply = send(&p.app, get("/api/client/qr/nobody", Some(&cookie))).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.json()["error"], "Could not generate QR code");
}

#[tokio::test]
async fn settings_are_admin_only() {
    let p = panel();
    let viewer = login(&p.app, "viewer", "viewer-pw").await;
    let reply = send(&p.app, get("/settings", Some(&viewer))).await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/");

    let reply = send(&p.app, post_json("/api/crl/regenerate", &viewer, "")).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let admin = login(&p.app, "admin", "admin-pw").await;
    let reply = send(&p.app, get("/settings", Some(&admin))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("viewer"));

    let reply = send(&p.app, post_json("/api/crl/regenerate", &admin, "")).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn settings_actions_report_outcome() {
    let p = panel();
    let admin = login(&p.app, "admin", "admin-pw").await;

    let reply = send(
        &p.app,
        post_form(
            "/settings",
            Some(&admin),
            "action=change_password&old_password=nope&new_password=a&confirm_password=a",
        ),
    )
    .await;
    assert!(reply.body.contains("Old password is incorrect"));

    let reply = send(
        &p.app,
        post_form(
            "/settings",
            Some(&admin),
            "action=add_user&username=ops&password=ops-pw",
        ),
    )
    .await;
    assert!(reply.body.contains("User ops created successfully"));
    login(&p.app, "ops", "ops-pw").await;

    let reply = send(
        &p.app,
        post_form(
            "/settings",
            Some(&admin),
            "action=change_password&old_password=admin-pw&new_password=fresh&confirm_password=fresh",
        ),
    )
    .await;
    assert!(reply.body.contains("Password changed successfully"));
    login(&p.app, "admin", "fresh").await;
}

#[tokio::test]
async fn logout_ends_session() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;

    let reply = send(&p.app, get("/logout", Some(&cookie))).await;
    assert_eq!(reply.location(), "/login");

    let reply = send(&p.app, get("/api/clients", Some(&cookie))).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn download_rejects_traversal() {
    let p = panel();
    let cookie = login(&p.app, "admin", "admin-pw").await;
    std::fs::write(p.config.openvpn_dir.join("secret.ovpn"), "x").unwrap();
    let reply = send(
        &p.app,
        get("/api/client/download/..%2Fopenvpn%2Fsecret", Some(&cookie)),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
