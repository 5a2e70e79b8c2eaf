//! Password accounts and cookie sessions.
//!
//! Sessions live in the `sessions` table keyed by a random token; the browser
//! only ever holds the token. Handlers that need a signed-in user take a
//! [`CurrentUser`] argument, which rejects the request with
//! [`AppError::AuthRequired`] when there is no valid session.

use anyhow::Context;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::server::AppState;
use crate::types::{User, UserId};

pub const SESSION_COOKIE: &str = "taccuino_session";

/// The signed-in user of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or(AppError::AuthRequired)?;

        let conn = state.db.lock().await;
        db::find_session_user(&conn, &token)?
            .map(CurrentUser::from)
            .ok_or(AppError::AuthRequired)
    }
}

/// Hash a password with bcrypt. CPU heavy, runs off the async workers.
pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")?;
    Ok(hashed)
}

pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("Password verification task failed")?
        // A malformed stored hash is treated as a mismatch
        .unwrap_or(false);
    Ok(matches)
}

pub fn validate_credentials(username: &str, password: &str) -> AppResult<()> {
    if username.trim().is_empty() {
        return Err(AppError::Validation("Username is required.".to_string()));
    }
    if username.chars().count() > 80 {
        return Err(AppError::Validation(
            "Username must be at most 80 characters.".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AppError::Validation("Password is required.".to_string()));
    }
    Ok(())
}

/// Look up a user by name and check the password
pub async fn authenticate(
    state: &AppState,
    username: &str,
    password: String,
) -> AppResult<Option<User>> {
    let user = {
        let conn = state.db.lock().await;
        db::find_user_by_username(&conn, username.trim())?
    };
    let Some(user) = user else {
        debug!(username = %username, "Login for unknown user");
        return Ok(None);
    };
    if verify_password(password, user.password_hash.clone()).await? {
        Ok(Some(user))
    } else {
        debug!(username = %username, "Login with wrong password");
        Ok(None)
    }
}

/// Create an account. Returns `None` if the username is taken.
pub async fn register(state: &AppState, username: &str, password: String) -> AppResult<Option<User>> {
    validate_credentials(username, &password)?;
    let hash = hash_password(password, state.bcrypt_cost).await?;
    let conn = state.db.lock().await;
    let user = db::insert_user(&conn, username.trim(), &hash)?;
    if let Some(ref user) = user {
        info!(user = user.id, username = %user.username, "User registered");
    }
    Ok(user)
}

/// Start a session for `user` and return the cookie carrying its token
pub fn start_session(conn: &Connection, user: &User) -> AppResult<Cookie<'static>> {
    let token = Uuid::new_v4().to_string();
    db::insert_session(conn, &token, user.id, Utc::now())?;
    info!(user = user.id, "Session started");
    Ok(session_cookie(token))
}

/// End the session named by the request cookies, returning the updated jar
pub fn end_session(conn: &Connection, jar: CookieJar) -> AppResult<CookieJar> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        db::delete_session(conn, cookie.value())?;
    }
    Ok(jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}
