// Session HTTP Endpoints
//
// JSON in/out. Authentication is carried in query parameters: `token` for
// token-authorized routes, `id` for session-bound ones. A processing
// timeout guards every route and surfaces as 502.

use crate::error::SessionError;
use crate::sessions::SessionRegistry;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use presenti_core::{PresenceRecord, Scope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route(
            "/session",
            get(create_session)
                .put(put_presences)
                .delete(delete_session),
        )
        .route("/session/refresh", put(refresh_session))
        .route("/session/:scope", put(put_scoped))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({ "error": "Request timed out" })),
                    )
                }))
                .timeout(REQUEST_TIMEOUT),
        )
        .with_state(registry)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

#[derive(Deserialize)]
struct PresenceBody {
    #[serde(default)]
    presences: Vec<PresenceRecord>,
}

struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::InvalidToken => StatusCode::UNAUTHORIZED,
            SessionError::FirstPartyToken => StatusCode::BAD_REQUEST,
            SessionError::FirstPartyRequired => StatusCode::FORBIDDEN,
            SessionError::UnknownSession => StatusCode::NOT_FOUND,
            SessionError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn create_session(
    State(registry): State<Arc<SessionRegistry>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let descriptor = registry.create_session(&query.token).await?;
    Ok(Json(json!({
        "sessionID": descriptor.id,
        "expires": descriptor.expires_in.as_millis() as u64,
    })))
}

async fn put_presences(
    State(registry): State<Arc<SessionRegistry>>,
    Query(query): Query<IdQuery>,
    Json(body): Json<PresenceBody>,
) -> Result<Json<Value>, ApiError> {
    registry.set_presences(&query.id, body.presences)?;
    Ok(Json(json!({ "ok": true })))
}

async fn put_scoped(
    State(registry): State<Arc<SessionRegistry>>,
    Path(scope): Path<String>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<PresenceBody>,
) -> Result<Json<Value>, ApiError> {
    registry
        .set_scoped(&query.token, &Scope::from(scope.as_str()), body.presences)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn refresh_session(
    State(registry): State<Arc<SessionRegistry>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Value>, ApiError> {
    registry.refresh(&query.id)?;
    Ok(Json(json!({ "ok": true })))
}

async fn delete_session(
    State(registry): State<Arc<SessionRegistry>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Value>, ApiError> {
    registry.destroy(&query.id)?;
    Ok(Json(json!({ "ok": true })))
}
