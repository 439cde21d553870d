/**
 * Category Routes
 * Bulk read of the immutable category reference list.
 */
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::db::{self, models::Category};

#[derive(Debug, Serialize)]
pub struct CategoryListResponse {
    pub data: Vec<Category>,
}

/// GET /api/categories - All categories ordered by display_order
pub async fn list_categories() -> impl IntoResponse {
    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(CategoryListResponse { data: vec![] }),
            );
        }
    };

    let data = sqlx::query_as::<_, Category>(
        r#"
        SELECT id, name, slug, display_order, icon, color_accent
        FROM categories
        ORDER BY display_order
        "#,
    )
    .fetch_all(pool.as_ref())
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Database error fetching categories: {}", e);
        vec![]
    });

    (StatusCode::OK, Json(CategoryListResponse { data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_list_categories_degrades_without_database() {
        let app = Router::new().route("/api/categories", get(list_categories));
        let req = Request::get("/api/categories").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
