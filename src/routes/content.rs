/**
 * Content Routes
 * Public feed plus the authenticated content manager (CRUD over content and
 * its embed sub-records).
 */
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{
    self,
    models::{Category, Content, ContentEmbed, ContentWithCategory},
};
use crate::routes::auth::require_admin;
use crate::routes::{ErrorResponse, SuccessResponse};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Embed as submitted by the admin form. Blank URLs are dropped before
/// persisting; the saved set always completely replaces the previous one.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedForm {
    pub embed_type: String,
    pub embed_url: String,
}

/// Create/update body for a content row.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub embeds: Vec<EmbedForm>,
}

/// Joined row shape the feed query produces; reassembled into FeedItems
/// once the embeds are attached.
#[derive(Debug, sqlx::FromRow)]
struct FeedRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    category_id: Uuid,
    category_name: String,
    category_icon: Option<String>,
    category_color: Option<String>,
    thumbnail_url: Option<String>,
    publish_date: Option<DateTime<Utc>>,
    slug: String,
    created_at: DateTime<Utc>,
}

/// One feed entry: a published content row with its category metadata and
/// ordered embeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Uuid,
    pub category_name: String,
    pub category_icon: Option<String>,
    pub category_color: Option<String>,
    pub thumbnail_url: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub embeds: Vec<ContentEmbed>,
}

/// Response for GET /api/feed
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    pub categories: Vec<Category>,
    pub items: Vec<FeedItem>,
}

/// Response for GET /api/content (admin list)
#[derive(Debug, Serialize)]
pub struct ContentListResponse {
    pub data: Vec<ContentWithCategory>,
}

/// Response for create/update
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentDetailResponse {
    pub content: Content,
    pub embeds: Vec<ContentEmbed>,
}

// ============================================================================
// Validation & pure helpers
// ============================================================================

/// Embed types the form may submit.
pub const VALID_EMBED_TYPES: &[&str] = &["youtube", "instagram", "link", "image", "video"];

pub fn is_valid_embed_type(embed_type: &str) -> bool {
    VALID_EMBED_TYPES.contains(&embed_type)
}

/// Derive a slug from a title: lowercase, whitespace runs collapsed to
/// single hyphens. Deliberately NOT guaranteed unique.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Names of the required form fields that are missing, for the inline
/// validation error.
pub fn missing_fields(form: &ContentForm) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if form.title.trim().is_empty() {
        missing.push("title");
    }
    if form.category_id.is_none() {
        missing.push("category");
    }
    missing
}

/// Drop embeds with blank URLs (they are optional) and reject unknown
/// embed types. Display order is assigned from the surviving positions.
pub fn prepare_embeds(embeds: &[EmbedForm]) -> Result<Vec<EmbedForm>, String> {
    let kept: Vec<EmbedForm> = embeds
        .iter()
        .filter(|e| !e.embed_url.trim().is_empty())
        .cloned()
        .collect();

    for embed in &kept {
        if !is_valid_embed_type(&embed.embed_type) {
            return Err(format!(
                "Invalid embed type '{}'. Valid types: {:?}",
                embed.embed_type, VALID_EMBED_TYPES
            ));
        }
    }

    Ok(kept)
}

/// Client-side category filter over an already-fetched feed. Filtering never
/// re-queries the backend; `None` means show all.
pub fn filter_by_category(items: &[FeedItem], category_id: Option<Uuid>) -> Vec<FeedItem> {
    match category_id {
        None => items.to_vec(),
        Some(id) => items
            .iter()
            .filter(|item| item.category_id == id)
            .cloned()
            .collect(),
    }
}

// ============================================================================
// Database helpers
// ============================================================================

async fn fetch_embeds_for(pool: &PgPool, content_ids: &[Uuid]) -> Vec<ContentEmbed> {
    sqlx::query_as::<_, ContentEmbed>(
        r#"
        SELECT id, content_id, embed_type, embed_url, display_order
        FROM content_embeds
        WHERE content_id = ANY($1)
        ORDER BY display_order
        "#,
    )
    .bind(content_ids)
    .fetch_all(pool)
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Database error fetching embeds: {}", e);
        vec![]
    })
}

/// Insert a content row and its (already filtered) embeds in one transaction.
async fn insert_content(
    pool: &PgPool,
    form: &ContentForm,
    embeds: &[EmbedForm],
) -> Result<(Content, Vec<ContentEmbed>), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let content = sqlx::query_as::<_, Content>(
        r#"
        INSERT INTO content
            (title, description, category_id, thumbnail_url, published, publish_date, slug)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, title, description, category_id, thumbnail_url,
                  published, publish_date, slug, created_at
        "#,
    )
    .bind(&form.title)
    .bind(&form.description)
    .bind(form.category_id)
    .bind(&form.thumbnail_url)
    .bind(form.published)
    .bind(if form.published { Some(Utc::now()) } else { None })
    .bind(slugify(&form.title))
    .fetch_one(&mut *tx)
    .await?;

    let mut saved = Vec::with_capacity(embeds.len());
    for (idx, embed) in embeds.iter().enumerate() {
        let row = sqlx::query_as::<_, ContentEmbed>(
            r#"
            INSERT INTO content_embeds (content_id, embed_type, embed_url, display_order)
            VALUES ($1, $2, $3, $4)
            RETURNING id, content_id, embed_type, embed_url, display_order
            "#,
        )
        .bind(content.id)
        .bind(&embed.embed_type)
        .bind(&embed.embed_url)
        .bind(idx as i32)
        .fetch_one(&mut *tx)
        .await?;
        saved.push(row);
    }

    tx.commit().await?;
    Ok((content, saved))
}

/// Update a content row and replace its embed set inside one transaction,
/// so a mid-write failure cannot leave a half-saved record. Returns
/// `Ok(None)` when the id matches no row.
async fn update_content_tx(
    pool: &PgPool,
    id: Uuid,
    form: &ContentForm,
    embeds: &[EmbedForm],
) -> Result<Option<(Content, Vec<ContentEmbed>)>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let content = sqlx::query_as::<_, Content>(
        r#"
        UPDATE content
        SET title = $1, description = $2, category_id = $3, thumbnail_url = $4,
            published = $5, publish_date = $6, slug = $7
        WHERE id = $8
        RETURNING id, title, description, category_id, thumbnail_url,
                  published, publish_date, slug, created_at
        "#,
    )
    .bind(&form.title)
    .bind(&form.description)
    .bind(form.category_id)
    .bind(&form.thumbnail_url)
    .bind(form.published)
    .bind(if form.published { Some(Utc::now()) } else { None })
    .bind(slugify(&form.title))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let content = match content {
        Some(c) => c,
        None => return Ok(None),
    };

    // Complete replacement: no partial-update merge of embeds.
    sqlx::query("DELETE FROM content_embeds WHERE content_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let mut saved = Vec::with_capacity(embeds.len());
    for (idx, embed) in embeds.iter().enumerate() {
        let row = sqlx::query_as::<_, ContentEmbed>(
            r#"
            INSERT INTO content_embeds (content_id, embed_type, embed_url, display_order)
            VALUES ($1, $2, $3, $4)
            RETURNING id, content_id, embed_type, embed_url, display_order
            "#,
        )
        .bind(content.id)
        .bind(&embed.embed_type)
        .bind(&embed.embed_url)
        .bind(idx as i32)
        .fetch_one(&mut *tx)
        .await?;
        saved.push(row);
    }

    tx.commit().await?;
    Ok(Some((content, saved)))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/feed - Published content with categories and embeds
pub async fn get_feed() -> impl IntoResponse {
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

    // The two reads run concurrently; the feed is ready once both resolve.
    let categories_fut = sqlx::query_as::<_, Category>(
        r#"
        SELECT id, name, slug, display_order, icon, color_accent
        FROM categories
        ORDER BY display_order
        "#,
    )
    .fetch_all(pool.as_ref());

    let content_fut = sqlx::query_as::<_, FeedRow>(
        r#"
        SELECT c.id, c.title, c.description, c.category_id,
               cat.name AS category_name, cat.icon AS category_icon,
               cat.color_accent AS category_color,
               c.thumbnail_url, c.publish_date, c.slug, c.created_at
        FROM content c
        JOIN categories cat ON cat.id = c.category_id
        WHERE c.published = true
        ORDER BY c.created_at DESC
        "#,
    )
    .fetch_all(pool.as_ref());

    let (categories, rows) = match tokio::try_join!(categories_fut, content_fut) {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("Database error fetching feed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to load feed")),
            )
                .into_response();
        }
    };

    let content_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let all_embeds = if content_ids.is_empty() {
        vec![]
    } else {
        fetch_embeds_for(pool.as_ref(), &content_ids).await
    };

    let items: Vec<FeedItem> = rows
        .into_iter()
        .map(|row| {
            let embeds = all_embeds
                .iter()
                .filter(|e| e.content_id == row.id)
                .cloned()
                .collect();
            FeedItem {
                id: row.id,
                title: row.title,
                description: row.description,
                category_id: row.category_id,
                category_name: row.category_name,
                category_icon: row.category_icon,
                category_color: row.category_color,
                thumbnail_url: row.thumbnail_url,
                publish_date: row.publish_date,
                slug: row.slug,
                created_at: row.created_at,
                embeds,
            }
        })
        .collect();

    (StatusCode::OK, Json(FeedResponse { categories, items })).into_response()
}

/// GET /api/content - All content regardless of published state (auth)
pub async fn list_content(headers: HeaderMap) -> impl IntoResponse {
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

    match sqlx::query_as::<_, ContentWithCategory>(
        r#"
        SELECT c.id, c.title, c.description, c.category_id, cat.name AS category_name,
               c.thumbnail_url, c.published, c.publish_date, c.slug, c.created_at
        FROM content c
        JOIN categories cat ON cat.id = c.category_id
        ORDER BY c.created_at DESC
        "#,
    )
    .fetch_all(pool.as_ref())
    .await
    {
        Ok(data) => (StatusCode::OK, Json(ContentListResponse { data })).into_response(),
        Err(e) => {
            tracing::error!("Database error listing content: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to list content")),
            )
                .into_response()
        }
    }
}

/// POST /api/content - Create content with optional embeds (auth)
pub async fn create_content(
    headers: HeaderMap,
    Json(form): Json<ContentForm>,
) -> impl IntoResponse {
    if let Err(err_response) = require_admin(&headers) {
        return err_response.into_response();
    }

    let missing = missing_fields(&form);
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        )
            .into_response();
    }

    let embeds = match prepare_embeds(&form.embeds) {
        Ok(e) => e,
        Err(msg) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response();
        }
    };

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

    match insert_content(pool.as_ref(), &form, &embeds).await {
        Ok((content, embeds)) => {
            tracing::info!(content_id = %content.id, "content created");
            (
                StatusCode::CREATED,
                Json(ContentDetailResponse { content, embeds }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Database error creating content: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to create content")),
            )
                .into_response()
        }
    }
}

/// PUT /api/content/:id - Update content, replacing its embed set (auth)
pub async fn update_content(
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(form): Json<ContentForm>,
) -> impl IntoResponse {
    if let Err(err_response) = require_admin(&headers) {
        return err_response.into_response();
    }

    let missing = missing_fields(&form);
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        )
            .into_response();
    }

    let embeds = match prepare_embeds(&form.embeds) {
        Ok(e) => e,
        Err(msg) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response();
        }
    };

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

    match update_content_tx(pool.as_ref(), id, &form, &embeds).await {
        Ok(Some((content, embeds))) => {
            tracing::info!(content_id = %content.id, "content updated");
            (
                StatusCode::OK,
                Json(ContentDetailResponse { content, embeds }),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Content not found")),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database error updating content: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to update content")),
            )
                .into_response()
        }
    }
}

/// DELETE /api/content/:id - Delete content; embeds cascade (auth)
pub async fn delete_content(headers: HeaderMap, Path(id): Path<Uuid>) -> impl IntoResponse {
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

    match sqlx::query("DELETE FROM content WHERE id = $1")
        .bind(id)
        .execute(pool.as_ref())
        .await
    {
        Ok(result) => {
            if result.rows_affected() == 0 {
                return (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse::new("Content not found")),
                )
                    .into_response();
            }
            tracing::info!(content_id = %id, "content deleted");
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Err(e) => {
            tracing::error!("Database error deleting content: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to delete content")),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn embed(embed_type: &str, url: &str) -> EmbedForm {
        EmbedForm {
            embed_type: embed_type.to_string(),
            embed_url: url.to_string(),
        }
    }

    fn feed_item(category_id: Uuid) -> FeedItem {
        FeedItem {
            id: Uuid::new_v4(),
            title: "item".to_string(),
            description: None,
            category_id,
            category_name: "Reels".to_string(),
            category_icon: None,
            category_color: None,
            thumbnail_url: None,
            publish_date: None,
            slug: "item".to_string(),
            created_at: Utc::now(),
            embeds: vec![],
        }
    }

    #[test]
    fn test_slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("My First Reel"), "my-first-reel");
        assert_eq!(slugify("Hello"), "hello");
    }

    #[test]
    fn test_slugify_collapses_whitespace_runs() {
        assert_eq!(slugify("Too   many    spaces"), "too-many-spaces");
        assert_eq!(slugify("tabs\tand\nnewlines"), "tabs-and-newlines");
    }

    #[test]
    fn test_slugify_is_not_unique_by_design() {
        assert_eq!(slugify("Same Title"), slugify("same title"));
    }

    #[test]
    fn test_missing_fields_names_what_is_absent() {
        let form = ContentForm {
            title: "  ".to_string(),
            description: None,
            category_id: None,
            thumbnail_url: None,
            published: false,
            embeds: vec![],
        };
        assert_eq!(missing_fields(&form), vec!["title", "category"]);

        let form = ContentForm {
            title: "Ok".to_string(),
            description: None,
            category_id: Some(Uuid::new_v4()),
            thumbnail_url: None,
            published: false,
            embeds: vec![],
        };
        assert!(missing_fields(&form).is_empty());
    }

    #[test]
    fn test_prepare_embeds_drops_blank_urls() {
        let embeds = vec![
            embed("youtube", "https://youtu.be/abc"),
            embed("link", "   "),
            embed("image", ""),
            embed("instagram", "https://instagram.com/p/x"),
        ];
        let kept = prepare_embeds(&embeds).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].embed_url, "https://youtu.be/abc");
        assert_eq!(kept[1].embed_type, "instagram");
    }

    #[test]
    fn test_prepare_embeds_rejects_unknown_type() {
        let embeds = vec![embed("tiktok", "https://example.com")];
        assert!(prepare_embeds(&embeds).is_err());
    }

    #[test]
    fn test_prepare_embeds_ignores_type_of_blank_rows() {
        // A blank row is dropped before its type is checked.
        let embeds = vec![embed("tiktok", "")];
        assert!(prepare_embeds(&embeds).unwrap().is_empty());
    }

    #[test]
    fn test_filter_by_category_none_shows_all() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![feed_item(a), feed_item(b), feed_item(a)];

        assert_eq!(filter_by_category(&items, None).len(), 3);
        assert_eq!(filter_by_category(&items, Some(a)).len(), 2);
        assert_eq!(filter_by_category(&items, Some(Uuid::new_v4())).len(), 0);
    }

    #[tokio::test]
    async fn test_create_content_requires_auth() {
        let app = Router::new().route("/api/content", post(create_content));
        let body = serde_json::json!({ "title": "x", "categoryId": Uuid::new_v4() });
        let req = Request::post("/api/content")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
