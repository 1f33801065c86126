//! HTTP surface: trigger, webhook and dashboard routes.
//!
//! Trigger routes are meant for an external scheduler and require the cron
//! secret. Webhook routes (inbound replies, new inquiries) require the
//! webhook secret. An unconfigured secret rejects every request to its
//! routes.

pub mod error;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use tower_http::cors::{Any, CorsLayer};

pub use error::ApiError;

use crate::config::ServerConfig;
use crate::orchestrator::{NewLead, Orchestrator};
use crate::replies::ReplyRequest;

/// Shared secrets and the headers that carry them.
#[derive(Clone)]
pub struct ApiAuth {
    pub cron_secret: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub cron_header: String,
    pub webhook_header: String,
}

impl ApiAuth {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            cron_secret: config.cron_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
            cron_header: config.cron_header.to_lowercase(),
            webhook_header: config.webhook_header.to_lowercase(),
        }
    }

    /// Cron callers may also send `Authorization: Bearer <secret>`.
    fn check_cron(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = header_value(headers, &self.cron_header).or_else(|| {
            header_value(headers, header::AUTHORIZATION.as_str())
                .and_then(|v| v.strip_prefix("Bearer "))
        });
        check(self.cron_secret.as_ref(), presented)
    }

    fn check_webhook(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        check(
            self.webhook_secret.as_ref(),
            header_value(headers, &self.webhook_header),
        )
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn check(expected: Option<&SecretString>, presented: Option<&str>) -> Result<(), ApiError> {
    match (expected, presented) {
        (Some(secret), Some(given)) if constant_time_eq(secret.expose_secret(), given) => Ok(()),
        (None, _) => {
            tracing::warn!("Request rejected: secret not configured");
            Err(ApiError::Unauthorized)
        }
        _ => Err(ApiError::Unauthorized),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<ApiAuth>,
}

/// Build the router with every route and a permissive CORS layer.
pub fn router(orchestrator: Arc<Orchestrator>, auth: ApiAuth) -> Router {
    let state = AppState {
        orchestrator,
        auth: Arc::new(auth),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/run-sequences", post(run_sequences))
        .route("/api/run-sla-sweep", get(run_sla_sweep).post(run_sla_sweep))
        .route("/api/sla-dashboard", get(sla_dashboard))
        .route("/api/handle-reply", post(handle_reply))
        .route("/api/leads", post(create_lead))
        .layer(cors)
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lead-orchestrator"
    }))
}

// ── Triggers ────────────────────────────────────────────────────────────

async fn run_sequences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.check_cron(&headers)?;
    let report = state.orchestrator.run_sequences().await?;
    Ok(Json(report))
}

async fn run_sla_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.check_cron(&headers)?;
    let report = state.orchestrator.run_sla_sweep().await?;
    Ok(Json(report))
}

async fn sla_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.check_cron(&headers)?;
    let report = state.orchestrator.sla_dashboard().await?;
    Ok(Json(report))
}

// ── Webhooks ────────────────────────────────────────────────────────────

async fn handle_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ReplyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.check_webhook(&headers)?;
    let Json(request) = body?;
    let outcome = state.orchestrator.handle_reply(request).await?;
    Ok(Json(outcome))
}

async fn create_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewLead>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    state.auth.check_webhook(&headers)?;
    let Json(new_lead) = body?;
    let outcome = state.orchestrator.intake(new_lead).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::clock::SystemClock;
    use crate::config::OrchestratorConfig;
    use crate::notify::MemoryNotifier;
    use crate::orchestrator::OrchestratorDeps;
    use crate::sequences::SequenceCatalog;
    use crate::store::InMemoryLeadStore;

    fn app(cron: Option<&str>, webhook: Option<&str>) -> Router {
        let deps = OrchestratorDeps {
            store: Arc::new(InMemoryLeadStore::new()),
            outreach: Arc::new(MemoryNotifier::new("outreach")),
            alerts: Arc::new(MemoryNotifier::new("alerts")),
            clock: Arc::new(SystemClock),
        };
        let orchestrator = Orchestrator::new(
            deps,
            SequenceCatalog::builtin(),
            OrchestratorConfig::default(),
        );
        let auth = ApiAuth {
            cron_secret: cron.map(|s| SecretString::from(s.to_string())),
            webhook_secret: webhook.map(|s| SecretString::from(s.to_string())),
            cron_header: "x-cron-secret".into(),
            webhook_header: "x-webhook-secret".into(),
        };
        router(Arc::new(orchestrator), auth)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_secret() {
        let resp = app(None, None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn cron_routes_require_secret() {
        let app = app(Some("s3cret"), Some("hook"));

        let missing = app
            .clone()
            .oneshot(Request::post("/api/run-sequences").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(missing).await["error"], "unauthorized");

        let wrong = app
            .clone()
            .oneshot(
                Request::get("/api/run-sla-sweep")
                    .header("x-cron-secret", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .clone()
            .oneshot(
                Request::post("/api/run-sequences")
                    .header("x-cron-secret", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await["leadsScanned"], 0);

        let bearer = app
            .oneshot(
                Request::get("/api/sla-dashboard")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bearer.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unconfigured_secret_denies_everything() {
        let resp = app(None, None)
            .oneshot(
                Request::post("/api/handle-reply")
                    .header("x-webhook-secret", "")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"channel":"email","identifier":"a@x.org","text":"stop"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let resp = app(None, Some("hook"))
            .oneshot(
                Request::post("/api/handle-reply")
                    .header("x-webhook-secret", "hook")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn blank_identifier_is_bad_request() {
        let resp = app(None, Some("hook"))
            .oneshot(
                Request::post("/api/handle-reply")
                    .header("x-webhook-secret", "hook")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"channel":"email","identifier":" ","text":"stop"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn intake_returns_created() {
        let resp = app(None, Some("hook"))
            .oneshot(
                Request::post("/api/leads")
                    .header("x-webhook-secret", "hook")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"firstName":"Ana","email":"ana@example.org","program":"veterans","housing":"homeless"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["lead"]["riskScore"], 50);
        assert_eq!(json["welcomeSent"], true);
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
