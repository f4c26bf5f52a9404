//! Server-rendered HTML pages.

use std::fmt::Write;

use ovpn_panel_core::credentials::{Role, UserMap};
use ovpn_panel_core::registry::ClientEntry;
use ovpn_panel_core::server_info::{ServerInfo, ServiceStatus};

/// Escape text for HTML element and attribute content.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
         color: #e0e0e0; background: #0d1117; line-height: 1.6; }
  .container { max-width: 900px; margin: 0 auto; padding: 2rem 1rem; }
  h1 { font-size: 1.8rem; margin-bottom: 0.5rem; color: #f0f0f0; }
  h2 { font-size: 1.2rem; margin: 2rem 0 0.75rem; color: #c0c0c0; }
  nav { display: flex; justify-content: space-between; align-items: center; margin-bottom: 1.5rem; }
  nav a { margin-left: 1rem; }
  table { width: 100%; border-collapse: collapse; margin-bottom: 1.5rem; }
  th, td { padding: 0.5rem 0.75rem; text-align: left; border-bottom: 1px solid #21262d; }
  th { color: #8b949e; font-weight: 600; font-size: 0.85em; text-transform: uppercase; }
  a { color: #58a6ff; text-decoration: none; }
  a:hover { text-decoration: underline; }
  .box { background: #161b22; border: 1px solid #30363d; border-radius: 8px;
         padding: 1.5rem; margin: 1.5rem 0; }
  input { background: #0d1117; color: #e0e0e0; border: 1px solid #30363d; border-radius: 4px;
          padding: 0.4rem 0.6rem; margin: 0.25rem 0.5rem 0.25rem 0; }
  button { background: #238636; color: #fff; border: 0; border-radius: 4px;
           padding: 0.4rem 0.9rem; cursor: pointer; }
  button.danger { background: #da3633; }
  .error { color: #f85149; margin-bottom: 1rem; }
  .message { color: #3fb950; margin-bottom: 1rem; }
  .running { color: #3fb950; }
  .stopped { color: #f85149; }
  #qr img { max-width: 100%; background: #fff; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} | OpenVPN Panel</title>
<style>{STYLE}</style>
</head>
<body>
<div class="container">
{body}
</div>
</body>
</html>"#,
        title = escape(title),
    )
}

fn notice(message: Option<&str>, error: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(e) = error {
        let _ = write!(out, r#"<p class="error">{}</p>"#, escape(e));
    }
    if let Some(m) = message {
        let _ = write!(out, r#"<p class="message">{}</p>"#, escape(m));
    }
    out
}

pub fn login(error: Option<&str>) -> String {
    let body = format!(
        r#"<div class="box">
  <h1>OpenVPN Panel</h1>
  {notice}
  <form method="post" action="/login">
    <input name="username" placeholder="Username" autocomplete="username" required>
    <input name="password" type="password" placeholder="Password" autocomplete="current-password" required>
    <button type="submit">Sign in</button>
  </form>
</div>"#,
        notice = notice(None, error),
    );
    layout("Sign in", &body)
}

fn client_rows(clients: &[ClientEntry]) -> String {
    if clients.is_empty() {
        return r#"<tr><td colspan="4">No clients yet.</td></tr>"#.to_string();
    }
    let mut rows = String::new();
    for c in clients {
        // Scripts read the name from data-name, never from inline JS source.
        let name = escape(&c.name);
        let bundle = if c.config_exists {
            format!(
                r##"<a href="/api/client/download/{name}">Download</a> ({size} B) <a href="#" data-name="{name}" onclick="showQr(this.dataset.name);return false;">QR</a>"##,
                size = c.config_size,
            )
        } else {
            format!(
                r##"<a href="#" data-name="{name}" onclick="regenerate(this.dataset.name);return false;">Generate</a>"##,
            )
        };
        let _ = write!(
            rows,
            r#"<tr>
  <td><code>{name}</code></td>
  <td>{created}</td>
  <td>{bundle}</td>
  <td><button class="danger" data-name="{name}" onclick="revoke(this.dataset.name)">Revoke</button></td>
</tr>"#,
            created = escape(&c.created),
        );
    }
    rows
}

const DASHBOARD_JS: &str = r#"
async function call(url, body) {
  const res = await fetch(url, {method: 'POST', headers: {'Content-Type': 'application/json'},
                                body: JSON.stringify(body)});
  const data = await res.json();
  if (!data.success) { alert(data.error); return; }
  location.reload();
}
function createClient(ev) {
  ev.preventDefault();
  const name = document.getElementById('name').value.trim();
  const addr = document.getElementById('server_address').value.trim();
  call('/api/client/create', addr ? {name, server_address: addr} : {name});
}
function revoke(name) {
  if (confirm('Revoke ' + name + '? This cannot be undone.')) call('/api/client/revoke', {name});
}
function regenerate(name) { call('/api/client/regenerate', {name}); }
async function showQr(name) {
  const res = await fetch('/api/client/qr/' + encodeURIComponent(name));
  const data = await res.json();
  document.getElementById('qr').innerHTML = data.qr_code
    ? '<img alt="QR" src="' + data.qr_code + '">' : '<p class="error">' + data.error + '</p>';
}
"#;

pub fn dashboard(
    username: &str,
    is_admin: bool,
    info: &ServerInfo,
    clients: &[ClientEntry],
) -> String {
    let settings = if is_admin {
        r#"<a href="/settings">Settings</a>"#
    } else {
        ""
    };
    let status_class = match info.status {
        ServiceStatus::Running => "running",
        ServiceStatus::Stopped => "stopped",
    };
    let body = format!(
        r#"<nav>
  <h1>OpenVPN Panel</h1>
  <div>{user} {settings}<a href="/logout">Sign out</a></div>
</nav>
<div class="box">
  <table>
    <tr><th>Public address</th><th>Port</th><th>Status</th></tr>
    <tr><td>{ip}</td><td>{port}</td><td class="{status_class}">{status}</td></tr>
  </table>
</div>
<h2>New client</h2>
<form class="box" onsubmit="createClient(event)">
  <input id="name" placeholder="client-name" pattern="[A-Za-z0-9_\-]+" required>
  <input id="server_address" placeholder="Server address (optional)">
  <button type="submit">Create</button>
</form>
<h2>Clients</h2>
<table>
  <thead><tr><th>Name</th><th>Issued</th><th>Bundle</th><th></th></tr></thead>
  <tbody>
  {rows}
  </tbody>
</table>
<div id="qr"></div>
<script>{DASHBOARD_JS}</script>"#,
        user = escape(username),
        ip = escape(&info.ip),
        port = info.port,
        status = info.status,
        rows = client_rows(clients),
    );
    layout("Dashboard", &body)
}

pub fn settings(users: &UserMap, message: Option<&str>, error: Option<&str>) -> String {
    let mut rows = String::new();
    for (name, record) in users {
        let role = match record.role {
            Role::Admin => "admin",
            Role::User => "user",
        };
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{role}</td><td>{}</td></tr>",
            escape(name),
            record.created.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    let body = format!(
        r#"<nav>
  <h1>Settings</h1>
  <div><a href="/">Dashboard</a><a href="/logout">Sign out</a></div>
</nav>
{notice}
<h2>Change password</h2>
<form class="box" method="post" action="/settings">
  <input type="hidden" name="action" value="change_password">
  <input name="old_password" type="password" placeholder="Current password">
  <input name="new_password" type="password" placeholder="New password">
  <input name="confirm_password" type="password" placeholder="Confirm new password">
  <button type="submit">Change</button>
</form>
<h2>Add user</h2>
<form class="box" method="post" action="/settings">
  <input type="hidden" name="action" value="add_user">
  <input name="username" placeholder="Username">
  <input name="password" type="password" placeholder="Password">
  <button type="submit">Add</button>
</form>
<h2>Users</h2>
<table>
  <thead><tr><th>Username</th><th>Role</th><th>Created</th></tr></thead>
  <tbody>{rows}</tbody>
</table>"#,
        notice = notice(message, error),
    );
    layout("Settings", &body)
}
