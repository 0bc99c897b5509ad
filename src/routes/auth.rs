use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    auth::{password, Principal},
    error::{AppError, AppResult},
    models::{NewSession, User},
    schema::{sessions, users},
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::username.eq(&payload.username))
        .first(&mut conn)
        .map_err(|_| AppError::unauthorized())?;

    if !user.enabled || user.status != "active" {
        return Err(AppError::unauthorized());
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let now = Utc::now();
    let session_id = Uuid::new_v4();
    let expires_at = now + ChronoDuration::hours(state.config.session_expiry_hours);

    let access_token = state
        .jwt
        .generate_token(user.id, &user.username, session_id)
        .map_err(AppError::from)?;

    let new_session = NewSession {
        id: session_id,
        user_id: user.id,
        token_hash: hash_session_token(&access_token),
        issued_at: now.naive_utc(),
        expires_at: expires_at.naive_utc(),
        last_used_at: now.naive_utc(),
    };

    diesel::insert_into(sessions::table)
        .values(&new_session)
        .execute(&mut conn)?;

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.session_expiry_hours * 3600,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    diesel::update(
        sessions::table
            .find(principal.session_id)
            .filter(sessions::revoked_at.is_null()),
    )
    .set((sessions::revoked_at.eq(now), sessions::updated_at.eq(now)))
    .execute(&mut conn)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(principal: Principal) -> Json<Principal> {
    Json(principal)
}

fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
