//! Control-plane route handlers.
//!
//! Handlers are thin: they authenticate, parse, and delegate to the
//! [`MountManager`](crate::services::MountManager). Streaming paths never
//! reach this router; see [`connection`](super::connection).

use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::response::{api_error, api_success, api_text};
use crate::api::status::icestats;
use crate::api::AppState;
use crate::auth::require_password;
use crate::error::{StreamError, StreamResult};
use crate::protocol_constants::ADMIN_AUTH_REALM;
use crate::services::SourceRequest;
use crate::source::SourceKind;
use crate::state::SourceType;
use crate::stream::Mount;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

fn default_mount() -> String {
    "/stream".to_string()
}

#[derive(Debug, Deserialize)]
struct SwitchSourceRequest {
    #[serde(default = "default_mount")]
    mount: String,
    #[serde(rename = "type", default)]
    source_type: SourceType,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MountQuery {
    mount: Option<String>,
    song: Option<String>,
}

impl MountQuery {
    fn mount(&self) -> StreamResult<&str> {
        self.mount
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| StreamError::InvalidRequest("Missing mount parameter".into()))
    }
}

/// One row of `/admin/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MountSummary {
    path: String,
    listeners: usize,
    listener_peak: usize,
    source_type: &'static str,
    source_url: Option<String>,
    title: Option<String>,
    name: String,
    genre: String,
    bitrate: u32,
}

impl MountSummary {
    fn of(mount: &Mount) -> Self {
        let stats = mount.stats();
        let source = mount.source();
        Self {
            path: stats.path,
            listeners: stats.listeners,
            listener_peak: stats.listener_peak,
            source_type: source.as_ref().map_or("none", |s| s.kind().as_str()),
            source_url: source
                .filter(|s| s.kind() == SourceKind::Relay)
                .map(|s| s.describe()),
            title: stats.title,
            name: stats.info.name,
            genre: stats.info.genre,
            bitrate: stats.info.bitrate,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::POST,
            Method::OPTIONS,
        ])
        .allow_headers([
            HeaderName::from_static("icy-metadata"),
            header::RANGE,
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
        ])
}

/// Creates the control-plane router.
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/source", post(switch_source))
        .route("/admin/metadata", get(update_metadata))
        .route("/admin/listmounts", get(list_mounts))
        .route("/admin/killsource", get(kill_source))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/", get(banner))
        .route("/status-json.xsl", get(status_document))
        .route("/status.json", get(status_document))
        .route("/admin/status", get(admin_status))
        .merge(admin)
        .fallback(not_found)
        .layer(cors_layer())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn banner() -> impl IntoResponse {
    concat!("icewire ", env!("CARGO_PKG_VERSION"), " is running")
}

async fn status_document(State(state): State<AppState>) -> Response {
    let doc = icestats(
        &state.manager.stats(),
        &state.network,
        state.started_at,
        &state.config().server_name,
    );
    let mut response = api_success(doc).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// GET /admin/status
///
/// Unauthenticated so a management page can poll it.
async fn admin_status(State(state): State<AppState>) -> impl IntoResponse {
    let mounts: Vec<MountSummary> = state
        .manager
        .mounts()
        .iter()
        .map(|m| MountSummary::of(m))
        .collect();
    api_success(json!({ "mounts": mounts }))
}

/// Unknown admin commands still require credentials before saying so.
async fn not_found(State(state): State<AppState>, request: Request) -> Response {
    if !request.uri().path().starts_with("/admin/") {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }
    match check_admin(&state, &request) {
        Ok(()) => (StatusCode::NOT_FOUND, "Unknown admin command").into_response(),
        Err(e) => e.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn check_admin(state: &AppState, request: &Request) -> StreamResult<()> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    require_password(authorization, &state.config().admin_password, ADMIN_AUTH_REALM)
        .map(|_| ())
        .inspect_err(|_| {
            log::warn!("[Admin] Rejected {} {}", request.method(), request.uri().path());
        })
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match check_admin(&state, &request) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// POST /admin/source
///
/// Body: `{"mount": "/stream", "type": "relay", "url": "http://..."}`. Any
/// other type, or a relay without a URL, switches to the playlist.
async fn switch_source(State(state): State<AppState>, body: Bytes) -> Response {
    let request: SwitchSourceRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            log::debug!("[Admin] Bad source switch body: {}", e);
            return api_error(StatusCode::BAD_REQUEST, "invalid_json", "Invalid JSON")
                .into_response();
        }
    };

    let source = match (request.source_type, request.url) {
        (SourceType::Relay, Some(url)) if !url.is_empty() => SourceRequest::Relay { url },
        _ => SourceRequest::Playlist { music_dir: None },
    };
    let url = match &source {
        SourceRequest::Relay { url } => Some(url.clone()),
        SourceRequest::Playlist { .. } => None,
    };

    match state.manager.switch_source(&request.mount, source) {
        Ok(kind) => api_success(json!({ "ok": true, "source": kind, "url": url })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /admin/metadata?mount=/stream&song=Artist+-+Title
async fn update_metadata(
    State(state): State<AppState>,
    Query(query): Query<MountQuery>,
) -> StreamResult<impl IntoResponse> {
    let mount = query.mount()?;
    let song = query.song.as_deref().unwrap_or_default();
    state.manager.update_metadata(mount, song, None)?;
    log::info!("[Admin] Metadata on {} set to '{}'", mount, song);
    Ok(api_text("Metadata updated"))
}

/// GET /admin/listmounts
async fn list_mounts(State(state): State<AppState>) -> impl IntoResponse {
    let mounts: Vec<_> = state
        .manager
        .mounts()
        .iter()
        .map(|m| {
            let summary = MountSummary::of(m);
            json!({
                "path": summary.path,
                "listeners": summary.listeners,
                "source": summary.source_type,
                "title": summary.title,
            })
        })
        .collect();
    api_success(mounts)
}

/// GET /admin/killsource?mount=/stream
async fn kill_source(
    State(state): State<AppState>,
    Query(query): Query<MountQuery>,
) -> StreamResult<impl IntoResponse> {
    let mount = query.mount()?;
    match state.manager.kill_source(mount) {
        Ok(_) | Err(StreamError::NoSource(_)) => Ok(api_text("Source killed")),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::context::NetworkContext;
    use crate::services::MountManager;
    use crate::state::Config;

    fn app() -> (Router, AppState) {
        let config = Config {
            mounts: Vec::new(),
            ..Config::default()
        };
        let manager = MountManager::new(Arc::new(config), reqwest::Client::new());
        let state = AppState::new(manager, NetworkContext::for_test());
        (create_router(state.clone()), state)
    }

    fn admin(uri: &str) -> axum::http::request::Builder {
        HttpRequest::builder().uri(uri).header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode("admin:admin")),
        )
    }

    async fn body_of(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn admin_requires_credentials() {
        let (router, _) = app();
        let response = router
            .clone()
            .oneshot(HttpRequest::builder().uri("/admin/listmounts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Icecast Admin\""
        );

        let wrong = HttpRequest::builder()
            .uri("/admin/killsource?mount=/x")
            .header(header::AUTHORIZATION, format!("Basic {}", STANDARD.encode("admin:nope")))
            .body(Body::empty())
            .unwrap();
        assert_eq!(router.oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_endpoints_are_public() {
        let (router, state) = app();
        state.manager.get_or_create("/live").unwrap();
        state.manager.update_metadata("/live", "Now Playing", None).unwrap();

        let response = router
            .clone()
            .oneshot(HttpRequest::builder().uri("/status-json.xsl").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(json["icestats"]["source"]["title"], "Now Playing");
        assert_eq!(json["icestats"]["source"]["server_name"], "live");

        let response = router
            .oneshot(HttpRequest::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(json["mounts"][0]["path"], "/live");
        assert_eq!(json["mounts"][0]["sourceType"], "none");
        assert_eq!(json["mounts"][0]["sourceUrl"], Value::Null);
        state.manager.shutdown();
    }

    #[tokio::test]
    async fn metadata_and_kill_commands() {
        let (router, state) = app();
        let mount = state.manager.get_or_create("/m").unwrap();

        let response = router
            .clone()
            .oneshot(admin("/admin/metadata?mount=/m&song=Artist%20-%20Song").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_of(response).await[..], b"Metadata updated");
        assert_eq!(mount.metadata().title.as_deref(), Some("Artist - Song"));

        let response = router
            .clone()
            .oneshot(admin("/admin/metadata?mount=/nope&song=x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .clone()
            .oneshot(admin("/admin/killsource?mount=/m").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(&body_of(response).await[..], b"Source killed");

        let response = router
            .oneshot(admin("/admin/reboot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(&body_of(response).await[..], b"Unknown admin command");
        state.manager.shutdown();
    }

    #[tokio::test]
    async fn source_switch_validates_body() {
        let (router, state) = app();
        let response = router
            .clone()
            .oneshot(
                admin("/admin/source")
                    .method(Method::POST)
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(json["message"], "Invalid JSON");

        let response = router
            .clone()
            .oneshot(
                admin("/admin/source")
                    .method(Method::POST)
                    .body(Body::from(r#"{"mount":"/missing","type":"playlist"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::state::MountConfig::playlist("/p", dir.path());
        config.name = "P".into();
        state.manager.create_mount(config).unwrap();
        let response = router
            .oneshot(
                admin("/admin/source")
                    .method(Method::POST)
                    .body(Body::from(r#"{"mount":"/p","type":"playlist"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["source"], "playlist");
        state.manager.shutdown();
    }
}
