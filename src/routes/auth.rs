/**
 * Authentication Routes
 * JWT sessions over the profiles table: register (first admin only), login,
 * verify, refresh, logout, and password update.
 */
use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db;
use crate::routes::ErrorResponse;

// ============================================================================
// Configuration
// ============================================================================

lazy_static::lazy_static! {
    /// JWT secret key from environment
    pub static ref JWT_SECRET: String = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "default-jwt-secret-change-in-production".to_string());

    /// Admin email fallback for database-less dev mode
    pub static ref ADMIN_EMAIL: String = std::env::var("ADMIN_EMAIL")
        .unwrap_or_else(|_| "admin@example.com".to_string());

    /// Admin password hash fallback (or plain password to hash at startup)
    pub static ref ADMIN_PASSWORD_HASH: String = {
        if let Ok(hash) = std::env::var("ADMIN_HASH_PASSWORD") {
            hash
        } else if let Ok(plain) = std::env::var("ADMIN_PASSWORD") {
            hash_password_blocking(&plain)
        } else {
            hash_password_blocking("admin123")
        }
    };

    /// In-memory refresh token cache (survives until restart)
    pub static ref REFRESH_TOKENS: Arc<RwLock<HashMap<String, RefreshTokenData>>> =
        Arc::new(RwLock::new(HashMap::new()));

    /// Rate limit storage (IP -> last request timestamp)
    pub static ref RATE_LIMIT: Arc<RwLock<HashMap<String, i64>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

fn hash_password_blocking(plain: &str) -> String {
    hash(plain, DEFAULT_COST).unwrap_or_default()
}

/// Access token expiry in minutes
const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 15;

/// Refresh token expiry in days
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 7;

/// Rate limit window in seconds (1 request per IP per 60 seconds)
#[allow(dead_code)]
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,    // Profile ID
    pub email: String,  // Profile email
    pub is_admin: bool, // Authorization flag
    pub exp: i64,       // Expiry timestamp
    pub iat: i64,       // Issued at timestamp
}

/// Cached refresh token data
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub profile_id: String,
    pub email: String,
    pub is_admin: bool,
    pub expires_at: i64,
    pub revoked: bool,
}

/// Session info returned to the admin dashboard
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub profile_id: String,
    pub email: String,
    pub is_admin: bool,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub session: Option<SessionInfo>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub session: Option<SessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub is_valid: bool,
    pub session: Option<SessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Generate a random opaque refresh token
fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// SHA-256 digest of a refresh token. Only the digest is ever stored, so a
/// leaked token table cannot be replayed directly.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create access token
pub(crate) fn create_access_token(
    profile_id: &str,
    email: &str,
    is_admin: bool,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES);

    let claims = Claims {
        sub: profile_id.to_string(),
        email: email.to_string(),
        is_admin,
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
}

/// Verify and decode access token
pub fn verify_access_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Require a valid access token whose profile carries the admin flag.
///
/// 401 without a usable token, 403 when the session is not an admin. Every
/// protected handler calls this instead of checking mere header presence.
pub fn require_admin(headers: &HeaderMap) -> Result<Claims, (StatusCode, Json<ErrorResponse>)> {
    let token = extract_bearer_token(headers).ok_or((
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Authorization required")),
    ))?;

    let claims = verify_access_token(&token).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Invalid or expired token")),
        )
    })?;

    if !claims.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Admin access required")),
        ));
    }

    Ok(claims)
}

/// Check rate limit for an IP.
///
/// Stale entries are evicted on every write so the map stays proportional
/// to the number of active IPs.
async fn check_rate_limit(ip: &str) -> bool {
    #[cfg(test)]
    {
        let _ = ip;
        return true; // Bypass in tests so validation and credentials are exercised
    }

    #[cfg(not(test))]
    {
        let now = Utc::now().timestamp();
        let mut limits = RATE_LIMIT.write().await;

        limits.retain(|_, last| now - *last < RATE_LIMIT_WINDOW_SECS);

        if let Some(last_request) = limits.get(ip) {
            if now - last_request < RATE_LIMIT_WINDOW_SECS {
                return false;
            }
        }

        limits.insert(ip.to_string(), now);
        true
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
/// Create the first admin profile. Closed once any admin exists.
pub async fn register(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    let ip = addr.ip().to_string();

    if !check_rate_limit(&ip).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RegisterResponse {
                success: false,
                session: None,
                error: Some("Too many requests. Please try again later.".to_string()),
            }),
        );
    }

    if payload.email.is_empty() || payload.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(RegisterResponse {
                success: false,
                session: None,
                error: Some("Email and password are required".to_string()),
            }),
        );
    }

    if !payload.email.contains('@') {
        return (
            StatusCode::BAD_REQUEST,
            Json(RegisterResponse {
                success: false,
                session: None,
                error: Some("Invalid email format".to_string()),
            }),
        );
    }

    if payload.password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            Json(RegisterResponse {
                success: false,
                session: None,
                error: Some("Password must be at least 8 characters long".to_string()),
            }),
        );
    }

    let pool = match db::get_pool() {
        Some(p) => p,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(RegisterResponse {
                    success: false,
                    session: None,
                    error: Some("Database not available".to_string()),
                }),
            );
        }
    };

    let existing: (i64,) =
        match sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE is_admin = true")
            .fetch_one(pool.as_ref())
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Failed to check existing admin profiles: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(RegisterResponse {
                        success: false,
                        session: None,
                        error: Some("Database error".to_string()),
                    }),
                );
            }
        };

    if existing.0 > 0 {
        return (
            StatusCode::FORBIDDEN,
            Json(RegisterResponse {
                success: false,
                session: None,
                error: Some("Registration is closed. An admin account already exists.".to_string()),
            }),
        );
    }

    // bcrypt is intentionally CPU-intensive; keep the async executor free.
    let password_hash =
        match tokio::task::spawn_blocking(move || hash(&payload.password, DEFAULT_COST)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                tracing::error!("Failed to hash password: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(RegisterResponse {
                        success: false,
                        session: None,
                        error: Some("Failed to process password".to_string()),
                    }),
                );
            }
            Err(e) => {
                tracing::error!("spawn_blocking panic during hash: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(RegisterResponse {
                        success: false,
                        session: None,
                        error: Some("Failed to process password".to_string()),
                    }),
                );
            }
        };

    match sqlx::query_as::<_, (Uuid,)>(
        r#"
        INSERT INTO profiles (email, password_hash, is_admin)
        VALUES ($1, $2, true)
        RETURNING id
        "#,
    )
    .bind(&payload.email)
    .bind(&password_hash)
    .fetch_one(pool.as_ref())
    .await
    {
        Ok((profile_id,)) => {
            tracing::info!("Admin profile registered: {}", payload.email);
            (
                StatusCode::CREATED,
                Json(RegisterResponse {
                    success: true,
                    session: Some(SessionInfo {
                        profile_id: profile_id.to_string(),
                        email: payload.email,
                        is_admin: true,
                    }),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to create admin profile: {}", e);
            let error_msg = if e.to_string().contains("unique") {
                "Email already registered".to_string()
            } else {
                "Failed to create account".to_string()
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RegisterResponse {
                    success: false,
                    session: None,
                    error: Some(error_msg),
                }),
            )
        }
    }
}

/// POST /api/auth/login
/// Authenticate against the profiles table and return tokens.
pub async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let ip = addr.ip().to_string();

    if !check_rate_limit(&ip).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(LoginResponse {
                success: false,
                session: None,
                access_token: None,
                refresh_token: None,
                error: Some("Too many requests. Please try again later.".to_string()),
            }),
        );
    }

    if payload.email.is_empty() || payload.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(LoginResponse {
                success: false,
                session: None,
                access_token: None,
                refresh_token: None,
                error: Some("Email and password are required".to_string()),
            }),
        );
    }

    if !payload.email.contains('@') {
        return (
            StatusCode::BAD_REQUEST,
            Json(LoginResponse {
                success: false,
                session: None,
                access_token: None,
                refresh_token: None,
                error: Some("Invalid email format".to_string()),
            }),
        );
    }

    // Query the profiles table when a database is configured; fall back to
    // env-var credentials otherwise (local dev without PG).
    let (profile_id, authenticated_email, is_admin): (String, String, bool) = match db::get_pool() {
        Some(pool) => {
            let row = sqlx::query_as::<_, (Uuid, String, String, bool)>(
                r#"SELECT id, email, password_hash, is_admin
                   FROM profiles
                   WHERE LOWER(email) = LOWER($1)"#,
            )
            .bind(&payload.email)
            .fetch_optional(pool.as_ref())
            .await;

            match row {
                Ok(Some((id, email, password_hash, is_admin))) => {
                    // bcrypt verify is CPU-bound; keep the executor free.
                    let pwd = payload.password.clone();
                    let password_ok = tokio::task::spawn_blocking(move || {
                        verify(&pwd, &password_hash).unwrap_or(false)
                    })
                    .await
                    .unwrap_or(false);

                    if !password_ok {
                        tracing::warn!("Failed login attempt for: {}", email);
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(LoginResponse {
                                success: false,
                                session: None,
                                access_token: None,
                                refresh_token: None,
                                error: Some("Invalid credentials".to_string()),
                            }),
                        );
                    }

                    (id.to_string(), email, is_admin)
                }
                Ok(None) => {
                    tracing::warn!("Login attempt for unknown profile: {}", payload.email);
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(LoginResponse {
                            success: false,
                            session: None,
                            access_token: None,
                            refresh_token: None,
                            error: Some("Invalid credentials".to_string()),
                        }),
                    );
                }
                Err(e) => {
                    tracing::error!("Database error during login: {}", e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(LoginResponse {
                            success: false,
                            session: None,
                            access_token: None,
                            refresh_token: None,
                            error: Some(
                                "Authentication service temporarily unavailable.".to_string(),
                            ),
                        }),
                    );
                }
            }
        }
        None => {
            let email_matches = payload.email.to_lowercase() == ADMIN_EMAIL.to_lowercase();
            let pwd = payload.password.clone();
            let password_matches = tokio::task::spawn_blocking(move || {
                verify(&pwd, &ADMIN_PASSWORD_HASH).unwrap_or(false)
            })
            .await
            .unwrap_or(false);
            if !email_matches || !password_matches {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(LoginResponse {
                        success: false,
                        session: None,
                        access_token: None,
                        refresh_token: None,
                        error: Some("Invalid credentials".to_string()),
                    }),
                );
            }
            ("admin-profile".to_string(), payload.email.clone(), true)
        }
    };

    let access_token = match create_access_token(&profile_id, &authenticated_email, is_admin) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Failed to create access token: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoginResponse {
                    success: false,
                    session: None,
                    access_token: None,
                    refresh_token: None,
                    error: Some("Failed to create token".to_string()),
                }),
            );
        }
    };

    let refresh_token = generate_refresh_token();
    let refresh_token_hash = hash_refresh_token(&refresh_token);
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    // Persist the refresh token hash when a database is available.
    if let (Some(pool), Ok(profile_uuid)) = (db::get_pool(), Uuid::parse_str(&profile_id)) {
        if let Err(e) = sqlx::query(
            r#"INSERT INTO profile_refresh_tokens (profile_id, token_hash, expires_at)
               VALUES ($1, $2, $3)"#,
        )
        .bind(profile_uuid)
        .bind(&refresh_token_hash)
        .bind(expires_at)
        .execute(pool.as_ref())
        .await
        {
            tracing::error!("Failed to persist refresh token: {}", e);
        }
    }

    // Also cache in-memory for fast validation and database-less mode.
    {
        let mut tokens = REFRESH_TOKENS.write().await;
        tokens.insert(
            refresh_token_hash,
            RefreshTokenData {
                profile_id: profile_id.clone(),
                email: authenticated_email.clone(),
                is_admin,
                expires_at: expires_at.timestamp(),
                revoked: false,
            },
        );
    }

    tracing::info!("Successful login for: {}", authenticated_email);

    (
        StatusCode::OK,
        Json(LoginResponse {
            success: true,
            session: Some(SessionInfo {
                profile_id,
                email: authenticated_email,
                is_admin,
            }),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            error: None,
        }),
    )
}

/// POST /api/auth/verify
/// Decode an access token and return session info.
pub async fn verify_token(headers: HeaderMap) -> impl IntoResponse {
    let token = match extract_bearer_token(&headers) {
        Some(t) => t,
        None => {
            return (
                StatusCode::OK,
                Json(VerifyResponse {
                    success: false,
                    is_valid: false,
                    session: None,
                    error: Some("No authorization token provided".to_string()),
                }),
            );
        }
    };

    match verify_access_token(&token) {
        Ok(claims) => (
            StatusCode::OK,
            Json(VerifyResponse {
                success: true,
                is_valid: true,
                session: Some(SessionInfo {
                    profile_id: claims.sub,
                    email: claims.email,
                    is_admin: claims.is_admin,
                }),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::debug!("Token verification failed: {}", e);
            (
                StatusCode::OK,
                Json(VerifyResponse {
                    success: false,
                    is_valid: false,
                    session: None,
                    error: Some("Invalid or expired token".to_string()),
                }),
            )
        }
    }
}

/// POST /api/auth/refresh
/// Rotate the refresh token and mint a new access token.
pub async fn refresh(Json(payload): Json<RefreshRequest>) -> impl IntoResponse {
    if payload.refresh_token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(RefreshResponse {
                success: false,
                access_token: None,
                refresh_token: None,
                error: Some("Refresh token is required".to_string()),
            }),
        );
    }

    let token_hash = hash_refresh_token(&payload.refresh_token);
    let now = Utc::now();

    // Resolve the token owner from the database first so sessions survive
    // restarts; fall back to the in-memory cache.
    let token_data: Option<RefreshTokenData> = {
        if let Some(pool) = db::get_pool() {
            match sqlx::query_as::<_, (Uuid, String, bool, chrono::DateTime<Utc>, bool)>(
                r#"SELECT p.id, p.email, p.is_admin, rt.expires_at, rt.revoked
                   FROM profile_refresh_tokens rt
                   JOIN profiles p ON p.id = rt.profile_id
                   WHERE rt.token_hash = $1"#,
            )
            .bind(&token_hash)
            .fetch_optional(pool.as_ref())
            .await
            {
                Ok(Some((profile_id, email, is_admin, expires_at, revoked))) => {
                    Some(RefreshTokenData {
                        profile_id: profile_id.to_string(),
                        email,
                        is_admin,
                        expires_at: expires_at.timestamp(),
                        revoked,
                    })
                }
                Ok(None) => {
                    let tokens = REFRESH_TOKENS.read().await;
                    tokens.get(&token_hash).cloned()
                }
                Err(e) => {
                    tracing::error!("DB error during token refresh lookup: {}", e);
                    let tokens = REFRESH_TOKENS.read().await;
                    tokens.get(&token_hash).cloned()
                }
            }
        } else {
            let tokens = REFRESH_TOKENS.read().await;
            tokens.get(&token_hash).cloned()
        }
    };

    match token_data {
        Some(data) if !data.revoked && data.expires_at > now.timestamp() => {
            let access_token =
                match create_access_token(&data.profile_id, &data.email, data.is_admin) {
                    Ok(token) => token,
                    Err(e) => {
                        tracing::error!("Failed to create access token: {}", e);
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(RefreshResponse {
                                success: false,
                                access_token: None,
                                refresh_token: None,
                                error: Some("Failed to create token".to_string()),
                            }),
                        );
                    }
                };

            // Rotate
            let new_refresh_token = generate_refresh_token();
            let new_token_hash = hash_refresh_token(&new_refresh_token);
            let new_expires_at = now + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

            if let Some(pool) = db::get_pool() {
                let _ = sqlx::query(
                    "UPDATE profile_refresh_tokens SET revoked = true WHERE token_hash = $1",
                )
                .bind(&token_hash)
                .execute(pool.as_ref())
                .await;

                if let Ok(profile_uuid) = Uuid::parse_str(&data.profile_id) {
                    let _ = sqlx::query(
                        r#"INSERT INTO profile_refresh_tokens (profile_id, token_hash, expires_at)
                           VALUES ($1, $2, $3)"#,
                    )
                    .bind(profile_uuid)
                    .bind(&new_token_hash)
                    .bind(new_expires_at)
                    .execute(pool.as_ref())
                    .await;
                }
            }

            {
                let mut tokens = REFRESH_TOKENS.write().await;
                if let Some(old_data) = tokens.get_mut(&token_hash) {
                    old_data.revoked = true;
                }
                tokens.insert(
                    new_token_hash,
                    RefreshTokenData {
                        profile_id: data.profile_id,
                        email: data.email,
                        is_admin: data.is_admin,
                        expires_at: new_expires_at.timestamp(),
                        revoked: false,
                    },
                );
            }

            (
                StatusCode::OK,
                Json(RefreshResponse {
                    success: true,
                    access_token: Some(access_token),
                    refresh_token: Some(new_refresh_token),
                    error: None,
                }),
            )
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(RefreshResponse {
                success: false,
                access_token: None,
                refresh_token: None,
                error: Some("Invalid or expired refresh token".to_string()),
            }),
        ),
    }
}

/// POST /api/auth/logout
/// Revoke refresh token(s); idempotent, always succeeds.
pub async fn logout(headers: HeaderMap, Json(payload): Json<LogoutRequest>) -> impl IntoResponse {
    let pool = db::get_pool();

    if let Some(refresh_token) = payload.refresh_token {
        let token_hash = hash_refresh_token(&refresh_token);

        if let Some(ref p) = pool {
            let _ = sqlx::query(
                "UPDATE profile_refresh_tokens SET revoked = true WHERE token_hash = $1",
            )
            .bind(&token_hash)
            .execute(p.as_ref())
            .await;
        }

        let mut tokens = REFRESH_TOKENS.write().await;
        if let Some(data) = tokens.get_mut(&token_hash) {
            data.revoked = true;
        }
    }

    // With an access token, revoke ALL refresh tokens for that profile.
    if let Some(access_token) = payload
        .access_token
        .or_else(|| extract_bearer_token(&headers))
    {
        if let Ok(claims) = verify_access_token(&access_token) {
            if let (Some(ref p), Ok(profile_uuid)) = (pool.as_ref(), Uuid::parse_str(&claims.sub)) {
                let _ = sqlx::query(
                    "UPDATE profile_refresh_tokens SET revoked = true WHERE profile_id = $1",
                )
                .bind(profile_uuid)
                .execute(p.as_ref())
                .await;
            }

            let mut tokens = REFRESH_TOKENS.write().await;
            for data in tokens.values_mut() {
                if data.profile_id == claims.sub {
                    data.revoked = true;
                }
            }
        }
    }

    (StatusCode::OK, Json(LogoutResponse { success: true }))
}

/// POST /api/auth/password
/// Update the authenticated profile's password and revoke existing sessions.
pub async fn update_password(
    headers: HeaderMap,
    Json(payload): Json<UpdatePasswordRequest>,
) -> impl IntoResponse {
    let claims = match require_admin(&headers) {
        Ok(c) => c,
        Err(err_response) => return err_response.into_response(),
    };

    if payload.new_password.len() < 8 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "New password must be at least 8 characters long",
            )),
        )
            .into_response();
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

    let profile_uuid = match Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid session")),
            )
                .into_response();
        }
    };

    let row = sqlx::query_as::<_, (String,)>("SELECT password_hash FROM profiles WHERE id = $1")
        .bind(profile_uuid)
        .fetch_optional(pool.as_ref())
        .await;

    let current_hash = match row {
        Ok(Some((h,))) => h,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Profile not found")),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("Database error during password update: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Database error")),
            )
                .into_response();
        }
    };

    let current = payload.current_password.clone();
    let current_ok =
        tokio::task::spawn_blocking(move || verify(&current, &current_hash).unwrap_or(false))
            .await
            .unwrap_or(false);
    if !current_ok {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Current password is incorrect")),
        )
            .into_response();
    }

    let new_password = payload.new_password.clone();
    let new_hash =
        match tokio::task::spawn_blocking(move || hash(&new_password, DEFAULT_COST)).await {
            Ok(Ok(h)) => h,
            _ => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Failed to process password")),
                )
                    .into_response();
            }
        };

    if let Err(e) = sqlx::query("UPDATE profiles SET password_hash = $1 WHERE id = $2")
        .bind(&new_hash)
        .bind(profile_uuid)
        .execute(pool.as_ref())
        .await
    {
        tracing::error!("Failed to update password: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to update password")),
        )
            .into_response();
    }

    // Force re-login everywhere after a password change.
    let _ = sqlx::query("UPDATE profile_refresh_tokens SET revoked = true WHERE profile_id = $1")
        .bind(profile_uuid)
        .execute(pool.as_ref())
        .await;
    {
        let mut tokens = REFRESH_TOKENS.write().await;
        for data in tokens.values_mut() {
            if data.profile_id == claims.sub {
                data.revoked = true;
            }
        }
    }

    tracing::info!("Password updated for: {}", claims.email);
    (
        StatusCode::OK,
        Json(crate::routes::SuccessResponse { success: true }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn auth_router() -> Router {
        use axum::extract::connect_info::MockConnectInfo;
        Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/verify", post(verify_token))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/password", post(update_password))
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 12345))))
    }

    async fn post_json(
        app: Router,
        uri: &str,
        json: &impl serde::Serialize,
    ) -> (StatusCode, axum::body::Bytes) {
        let body = Body::from(serde_json::to_vec(json).unwrap());
        let req = Request::post(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    async fn post_empty(app: Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
        let req = Request::post(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes)
    }

    #[test]
    fn test_verify_access_token_invalid_returns_err() {
        let result = verify_access_token("invalid.jwt.token");
        assert!(result.is_err());
    }

    #[test]
    fn test_require_admin_rejects_missing_header() {
        let headers = HeaderMap::new();
        let result = require_admin(&headers);
        assert!(matches!(result, Err((StatusCode::UNAUTHORIZED, _))));
    }

    #[test]
    fn test_require_admin_rejects_non_admin_claims() {
        let token = create_access_token("some-profile", "user@example.com", false).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        let result = require_admin(&headers);
        assert!(matches!(result, Err((StatusCode::FORBIDDEN, _))));
    }

    #[test]
    fn test_require_admin_accepts_admin_claims() {
        let token = create_access_token("some-profile", "admin@example.com", true).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        let claims = require_admin(&headers).unwrap();
        assert_eq!(claims.email, "admin@example.com");
        assert!(claims.is_admin);
    }

    #[tokio::test]
    async fn test_login_empty_email_returns_bad_request() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/login",
            &LoginRequest {
                email: "".to_string(),
                password: "admin123".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_invalid_email_format_returns_bad_request() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/login",
            &LoginRequest {
                email: "no-at-sign".to_string(),
                password: "admin123".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_wrong_credentials_returns_unauthorized() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/login",
            &LoginRequest {
                email: "admin@example.com".to_string(),
                password: "wrongpassword".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_verify_no_token_returns_error_in_body() {
        let (status, bytes) = post_empty(auth_router(), "/api/auth/verify").await;
        assert_eq!(status, StatusCode::OK);
        let body: VerifyResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.success);
        assert!(!body.is_valid);
    }

    #[tokio::test]
    async fn test_refresh_empty_token_returns_bad_request() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/refresh",
            &RefreshRequest {
                refresh_token: "".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_returns_success() {
        let (status, bytes) = post_json(
            auth_router(),
            "/api/auth/logout",
            &LogoutRequest {
                access_token: None,
                refresh_token: None,
            },
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: LogoutResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.success);
    }

    #[tokio::test]
    async fn test_update_password_requires_auth() {
        let (status, _) = post_json(
            auth_router(),
            "/api/auth/password",
            &UpdatePasswordRequest {
                current_password: "old".to_string(),
                new_password: "newpassword".to_string(),
            },
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
