//!
//! gatekeeper HTTP server
//! ----------------------
//! Axum front end for the session gatekeeper.
//!
//! Responsibilities:
//! - Read the external `session` cookie and run the gatekeeper on each guarded request.
//! - Keep local sessions in a server-side registry keyed by the `gatekeeper_sid` cookie.
//! - Set the local cookie when a session is established and clear it when one is destroyed.
//! - Expose `/whoami`, `/logout` and the login-guarded `/reports` descriptor endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::GatekeeperConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    new_session_id, DenyAllAuthority, GateOutcome, Gatekeeper, HttpSessionAuthority, JsonlSink, LocalSession,
    MultiSink, SessionAuthority, SessionRegistry, SessionSlot, SessionStore, TracingSink, sid_hint,
};
use crate::report::ReportManager;
use crate::tprintln;

/// Cookie carrying the external authority's session token.
pub const EXTERNAL_SESSION_COOKIE: &str = "session";
/// Cookie carrying this server's local session id.
pub const LOCAL_SESSION_COOKIE: &str = "gatekeeper_sid";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Gatekeeper,
    /// Session id -> local session mapping
    pub sessions: SessionRegistry,
    pub template_dir: PathBuf,
}

impl AppState {
    pub fn new(gatekeeper: Gatekeeper, template_dir: impl Into<PathBuf>) -> Self {
        Self { gatekeeper, sessions: SessionRegistry::new(), template_dir: template_dir.into() }
    }

    pub fn with_sessions(mut self, sessions: SessionRegistry) -> Self {
        self.sessions = sessions;
        self
    }

    /// Wire the authority client, audit sinks and session lifetime described by `cfg`.
    pub fn from_config(cfg: &GatekeeperConfig) -> AppResult<Self> {
        let authority: Arc<dyn SessionAuthority> = match cfg.authority_url.as_deref() {
            Some(url) => Arc::new(
                HttpSessionAuthority::new(url, cfg.authority_timeout)
                    .map_err(|e| AppError::upstream("authority_client".to_string(), format!("{}: {}", url, e)))?,
            ),
            None => {
                warn!(target: "startup", "no session authority configured; every external session will be rejected");
                Arc::new(DenyAllAuthority)
            }
        };

        let mut sink = MultiSink::new().with(TracingSink);
        if let Some(path) = cfg.audit_log.as_ref() {
            let file = JsonlSink::open(path).map_err(|e| {
                warn!(target: "startup", "cannot open audit log {}: {}", path.display(), e);
                AppError::from(e)
            })?;
            sink = sink.with(file);
        }

        let gatekeeper = Gatekeeper::new(authority, Arc::new(sink))
            .with_policy(cfg.role_policy())
            .with_timeout(cfg.authority_timeout);
        Ok(Self::new(gatekeeper, cfg.template_dir.clone())
            .with_sessions(SessionRegistry::with_ttl(cfg.session_ttl)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "gatekeeper ok" }))
        .route("/whoami", get(whoami))
        .route("/logout", post(logout))
        .route("/reports", get(reports))
        .with_state(state)
}

fn log_startup(cfg: &GatekeeperConfig) {
    info!(
        target: "startup",
        "gatekeeper starting: http_port={}, authority_url={:?}, authority_timeout_ms={}, privileged_roles={:?}, session_ttl_secs={}, audit_log={:?}, template_dir={:?}",
        cfg.http_port,
        cfg.authority_url,
        cfg.authority_timeout.as_millis(),
        cfg.privileged_roles,
        cfg.session_ttl.as_secs(),
        cfg.audit_log,
        cfg.template_dir
    );
}

/// Start the HTTP server and serve until the listener fails.
pub async fn run(cfg: GatekeeperConfig) -> anyhow::Result<()> {
    log_startup(&cfg);
    let state = AppState::from_config(&cfg)?;

    // Background sweeper for expired local sessions
    {
        let sessions = state.sessions.clone();
        let interval = sessions.ttl().min(Duration::from_secs(60));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = sessions.sweep().await;
                if removed > 0 { tracing::debug!(removed = removed, "session_sweep"); }
            }
        });
    }

    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie") {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some(eq) = p.find('=') {
                let (k, v) = p.split_at(eq);
                if k == name { return Some(v[1..].to_string()); }
            }
        }
    }
    None
}

fn set_session_cookie(sid: &str) -> AppResult<HeaderValue> {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!("{}={}; HttpOnly; Secure; SameSite=Strict; Path=/", LOCAL_SESSION_COOKIE, sid))
        .map_err(|e| AppError::internal("cookie".to_string(), e.to_string()))
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "gatekeeper_sid=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/",
    )
}

/// Run the gatekeeper for a request and persist the result into the registry.
///
/// Returns the outcome plus any `Set-Cookie` headers the response must carry. A client
/// supplied sid is only reused when it already names a live local session.
async fn gate_request(state: &AppState, headers: &HeaderMap) -> AppResult<(GateOutcome, HeaderMap)> {
    let token = parse_cookie(headers, EXTERNAL_SESSION_COOKIE);
    let sid = parse_cookie(headers, LOCAL_SESSION_COOKIE);
    let mut slot = match sid.as_deref() {
        Some(s) => state.sessions.load(s).await,
        None => SessionSlot::new(None),
    };
    let known_sid = if slot.current().is_some() { sid } else { None };

    let outcome = state.gatekeeper.resolve(token.as_deref(), &mut slot).await;
    let mut out = HeaderMap::new();
    match &outcome {
        GateOutcome::Authenticated(_) => {
            let (sid, fresh) = match known_sid {
                Some(s) => (s, false),
                None => (new_session_id()?, true),
            };
            state.sessions.commit(&sid, slot).await;
            if fresh {
                tprintln!("session.issue sid={}", sid_hint(&sid));
                out.insert("Set-Cookie", set_session_cookie(&sid)?);
            }
        }
        GateOutcome::Invalidated(ev) => {
            if let Some(sid) = known_sid.as_deref() {
                state.sessions.commit(sid, slot).await;
            }
            info!(target: "gatekeeper", reason = ev.reason().unwrap_or(""), "local session invalidated");
            out.insert("Set-Cookie", clear_session_cookie());
        }
        GateOutcome::Anonymous => {}
    }
    Ok((outcome, out))
}

fn unauthorized(headers: HeaderMap) -> Response {
    (headers, AppError::auth("unauthorized", "login required")).into_response()
}

fn session_json(rec: &LocalSession) -> serde_json::Value {
    json!({"status": "ok", "user": rec.user, "login_time": rec.login_time.timestamp()})
}

async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let (outcome, set_headers) = gate_request(&state, &headers).await?;
    match outcome {
        GateOutcome::Authenticated(rec) => Ok((StatusCode::OK, set_headers, Json(session_json(&rec))).into_response()),
        _ => Ok(unauthorized(set_headers)),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(sid) = parse_cookie(&headers, LOCAL_SESSION_COOKIE) {
        if state.sessions.remove(&sid).await {
            info!(target: "gatekeeper", "local session closed by logout");
        }
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    report_id: Option<String>,
    format: Option<String>,
}

async fn reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ReportQuery>,
) -> Result<Response, AppError> {
    let (outcome, set_headers) = gate_request(&state, &headers).await?;
    let GateOutcome::Authenticated(rec) = outcome else {
        return Ok(unauthorized(set_headers));
    };
    let report = ReportManager::new(q.report_id, q.format).with_template_dir(state.template_dir.clone());
    let body = json!({"status": "ok", "user": rec.user, "report": report.descriptor()});
    Ok((StatusCode::OK, set_headers, Json(body)).into_response())
}
