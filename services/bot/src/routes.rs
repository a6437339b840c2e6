//! Bot service routes

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::{TypedHeader, headers::ContentType};
use dispatch::models::RideStatus;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    telegram::types::Update,
};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const RECENT_RIDES: usize = 20;

/// Create the router for the bot service
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/dashboard", get(dashboard))
        .route("/webhook", post(webhook))
        .route("/set_webhook", post(set_webhook))
        .with_state(state)
}

/// Telegram update delivery
pub async fn webhook(
    State(state): State<AppState>,
    TypedHeader(content_type): TypedHeader<ContentType>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<&'static str> {
    if !content_type.to_string().starts_with("application/json") {
        return Err(ApiError::BadRequest("Expected application/json".to_string()));
    }

    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(secret) {
            warn!("Rejected webhook call with a missing or wrong secret");
            return Err(ApiError::Unauthorized);
        }
    }

    let update: Update = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid update: {}", e)))?;

    match state.sessions.first_delivery(update.update_id).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("Skipping redelivered update {}", update.update_id);
            return Ok("OK");
        }
        Err(e) => warn!(
            "Could not check update {} for redelivery: {}",
            update.update_id, e
        ),
    }

    let Some(inbound) = update.into_inbound() else {
        return Ok("OK");
    };

    if let Some(callback_id) = inbound.callback_id.as_deref() {
        if let Err(e) = state.telegram.answer_callback(callback_id, None).await {
            warn!("Failed to answer callback {}: {}", callback_id, e);
        }
    }

    state.handler.handle(inbound).await;
    Ok("OK")
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.backend.is_healthy().await {
        (StatusCode::OK, Json(json!({ "status": "healthy" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy" })),
        )
    }
}

pub async fn index(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.stores.rides.stats().await.map_err(dispatch_error)?;
    let active = stats.count(RideStatus::Pending)
        + stats.count(RideStatus::Accepted)
        + stats.count(RideStatus::OnTheWay)
        + stats.count(RideStatus::InProgress);

    Ok(Json(json!({
        "service": "ride-bot",
        "status": "running",
        "rides": stats.total,
        "active_rides": active,
    })))
}

/// Ride figures, recent rides, available drivers and users per role
pub async fn dashboard(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let fresh_since = state.clock.now() - state.config.dispatch_config().matcher.freshness;

    let stats = state.stores.rides.stats().await.map_err(dispatch_error)?;
    let recent = state
        .stores
        .rides
        .recent(RECENT_RIDES)
        .await
        .map_err(dispatch_error)?;
    let drivers = state
        .stores
        .drivers
        .list_available(fresh_since)
        .await
        .map_err(dispatch_error)?;
    let roles = state
        .stores
        .users
        .role_counts()
        .await
        .map_err(dispatch_error)?;

    let by_status: Map<String, Value> = stats
        .by_status
        .iter()
        .map(|(status, n)| (status.as_str().to_string(), json!(n)))
        .collect();

    Ok(Json(json!({
        "rides": {
            "total": stats.total,
            "by_status": by_status,
            "completed_revenue": stats.completed_revenue,
        },
        "recent_rides": recent,
        "available_drivers": drivers,
        "users": roles,
    })))
}

/// Register `PUBLIC_URL/webhook` with Telegram
pub async fn set_webhook(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let url = state
        .config
        .webhook_url()
        .ok_or_else(|| ApiError::BadRequest("PUBLIC_URL is not configured".to_string()))?;

    state
        .telegram
        .set_webhook(&url, state.config.webhook_secret.as_deref())
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    Ok(Json(json!({ "ok": true, "url": url })))
}

fn dispatch_error(e: dispatch::ports::StoreError) -> ApiError {
    ApiError::Dispatch(e.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, conversation, handler::ChatHandler, state::Backend, telegram::TelegramClient};
    use axum::http::HeaderValue;
    use dispatch::testing::World;
    use std::sync::Arc;

    fn app_state(world: &World, secret: Option<&str>) -> AppState {
        let config: AppConfig = serde_json::from_value(json!({
            "bot_token": "123:test",
            "webhook_secret": secret,
        }))
        .unwrap();
        let sessions = conversation::in_memory();
        let handler = ChatHandler::new(
            world.rides.clone(),
            world.accounts.clone(),
            world.stores.clone(),
            sessions.clone(),
            world.notifier.clone(),
        );

        AppState {
            config: Arc::new(config),
            backend: Backend::Memory,
            stores: world.stores.clone(),
            clock: world.clock.clone(),
            sessions,
            telegram: TelegramClient::with_base_url("http://127.0.0.1:9", "123:test").unwrap(),
            handler: Arc::new(handler),
        }
    }

    fn start_update(update_id: i64, user_id: i64) -> Bytes {
        Bytes::from(
            json!({
                "update_id": update_id,
                "message": {
                    "message_id": 1,
                    "from": { "id": user_id, "is_bot": false, "first_name": "Ann" },
                    "chat": { "id": user_id, "type": "private" },
                    "text": "/start"
                }
            })
            .to_string(),
        )
    }

    fn with_secret(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        headers
    }

    #[tokio::test]
    async fn webhook_handles_an_update_once() {
        let world = World::new();
        let state = app_state(&world, None);

        for _ in 0..2 {
            let reply = webhook(
                State(state.clone()),
                TypedHeader(ContentType::json()),
                HeaderMap::new(),
                start_update(7, 42),
            )
            .await
            .unwrap();
            assert_eq!(reply, "OK");
        }

        assert_eq!(world.notifier.messages_for("42").len(), 1);
    }

    #[tokio::test]
    async fn webhook_checks_the_secret() {
        let world = World::new();
        let state = app_state(&world, Some("s3cret"));

        let denied = webhook(
            State(state.clone()),
            TypedHeader(ContentType::json()),
            with_secret("wrong"),
            start_update(1, 42),
        )
        .await;
        assert!(matches!(denied, Err(ApiError::Unauthorized)));
        assert!(world.notifier.messages().is_empty());

        let accepted = webhook(
            State(state),
            TypedHeader(ContentType::json()),
            with_secret("s3cret"),
            start_update(2, 42),
        )
        .await;
        assert!(accepted.is_ok());
        assert_eq!(world.notifier.messages_for("42").len(), 1);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_payloads() {
        let world = World::new();
        let state = app_state(&world, None);

        let malformed = webhook(
            State(state.clone()),
            TypedHeader(ContentType::json()),
            HeaderMap::new(),
            Bytes::from_static(b"{not json"),
        )
        .await;
        assert!(matches!(malformed, Err(ApiError::BadRequest(_))));

        let wrong_type = webhook(
            State(state),
            TypedHeader(ContentType::text()),
            HeaderMap::new(),
            start_update(3, 42),
        )
        .await;
        assert!(matches!(wrong_type, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn memory_backend_reports_healthy() {
        let world = World::new();
        let response = health_check(State(app_state(&world, None)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn set_webhook_needs_a_public_url() {
        let world = World::new();
        let result = set_webhook(State(app_state(&world, None))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
