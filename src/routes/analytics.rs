/**
 * Analytics Routes
 * Fire-and-forget event reporter plus the authenticated dashboard summary.
 */
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analytics::{
    self, CategoryTotals, ContentRef, ContentTotals, DailyCounts, EventRecord, GrandTotals,
};
use crate::db;
use crate::routes::auth::require_admin;
use crate::routes::ErrorResponse;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    // Kept as a string so a malformed id is a handler-level 400, not a
    // body-rejection from the extractor.
    #[serde(default)]
    pub content_id: String,
    #[serde(default)]
    pub event_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub totals: GrandTotals,
    pub per_content: Vec<ContentTotals>,
    pub top_content: Vec<ContentTotals>,
    pub daily: Vec<DailyCounts>,
    pub categories: Vec<CategoryTotals>,
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/analytics/events - Record one interaction event
///
/// The reporter is fire-and-forget on the client side, so the only hard
/// failures are malformed reports. Once the report is well-formed the
/// response is 202 even when the insert fails; a lost event must never
/// surface as a user-visible error.
pub async fn record_event(headers: HeaderMap, Json(report): Json<EventReport>) -> impl IntoResponse {
    if !analytics::is_valid_event_type(&report.event_type) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "Invalid event type '{}'. Valid types: {:?}",
                report.event_type,
                analytics::VALID_EVENT_TYPES
            ))),
        )
            .into_response();
    }

    let content_id = match Uuid::parse_str(&report.content_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing or invalid contentId")),
            )
                .into_response();
        }
    };

    let user_agent = header_value(&headers, header::USER_AGENT);
    let referrer = header_value(&headers, header::REFERER);

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            tracing::warn!("analytics event dropped: database not available");
            return StatusCode::ACCEPTED.into_response();
        }
    };

    let result = sqlx::query(
        r#"
        INSERT INTO analytics_events (content_id, event_type, user_agent, referrer)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(content_id)
    .bind(&report.event_type)
    .bind(&user_agent)
    .bind(&referrer)
    .execute(pool.as_ref())
    .await;

    if let Err(e) = result {
        tracing::warn!("analytics event dropped: {}", e);
    }

    StatusCode::ACCEPTED.into_response()
}

/// GET /api/analytics/summary - Dashboard rollup (auth)
pub async fn get_summary(headers: HeaderMap) -> impl IntoResponse {
    if let Err(err_response) = require_admin(&headers) {
        return err_response.into_response();
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new("Database not available")),
            )
                .into_response();
        }
    };

    let content_fut = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
        r#"
        SELECT c.id, c.title, cat.name
        FROM content c
        LEFT JOIN categories cat ON cat.id = c.category_id
        WHERE c.published = true
        "#,
    )
    .fetch_all(pool.as_ref());

    let events_fut = sqlx::query_as::<_, (Uuid, String, DateTime<Utc>)>(
        r#"
        SELECT content_id, event_type, created_at
        FROM analytics_events
        "#,
    )
    .fetch_all(pool.as_ref());

    let (content_rows, event_rows) = match tokio::try_join!(content_fut, events_fut) {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("Database error building analytics summary: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to build analytics summary")),
            )
                .into_response();
        }
    };

    let content: Vec<ContentRef> = content_rows
        .into_iter()
        .map(|(id, title, category_name)| ContentRef {
            id,
            title,
            category_name,
        })
        .collect();

    let events: Vec<EventRecord> = event_rows
        .into_iter()
        .map(|(content_id, event_type, created_at)| EventRecord {
            content_id,
            event_type,
            created_at,
        })
        .collect();

    let per_content = analytics::content_totals(&content, &events);
    let summary = SummaryResponse {
        totals: analytics::grand_totals(&per_content),
        top_content: analytics::top_content(&per_content, 5),
        daily: analytics::daily_series(&events, Local::now().date_naive()),
        categories: analytics::category_totals(&content, &events),
        per_content,
    };

    (StatusCode::OK, Json(summary)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/api/analytics/events", post(record_event))
            .route("/api/analytics/summary", get(get_summary))
    }

    #[tokio::test]
    async fn test_record_event_rejects_unknown_type() {
        let body = serde_json::json!({ "contentId": Uuid::new_v4(), "eventType": "hover" });
        let req = Request::post("/api/analytics/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_event_requires_content_id() {
        let body = serde_json::json!({ "eventType": "view" });
        let req = Request::post("/api/analytics/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_event_rejects_malformed_content_id() {
        let body = serde_json::json!({ "contentId": "not-a-uuid", "eventType": "view" });
        let req = Request::post("/api/analytics/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_record_event_accepted_without_database() {
        // A valid report never fails just because persistence is down.
        let body = serde_json::json!({ "contentId": Uuid::new_v4(), "eventType": "view" });
        let req = Request::post("/api/analytics/events")
            .header("content-type", "application/json")
            .header("user-agent", "test-agent")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_summary_requires_auth() {
        let req = Request::get("/api/analytics/summary")
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
