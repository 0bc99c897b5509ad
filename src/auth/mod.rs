pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    access::RoleCategory,
    error::AppError,
    models::{Session, User},
    schema::{roles, sessions, user_plants, user_roles, users},
    state::AppState,
};

/// Authenticated caller, resolved per request: session liveness is checked
/// and touched, and role/plant assignments are read fresh from storage.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    #[serde(skip)]
    pub session_id: Uuid,
    pub roles: Vec<RoleCategory>,
    pub plants: Vec<String>,
    pub primary_plant: Option<String>,
}

impl Principal {
    pub fn has_role(&self, role: RoleCategory) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(RoleCategory::Admin)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let now = Utc::now().naive_utc();

        let session: Session = sessions::table
            .find(claims.sid)
            .filter(sessions::user_id.eq(claims.sub))
            .filter(sessions::revoked_at.is_null())
            .filter(sessions::expires_at.gt(now))
            .first(&mut conn)
            .map_err(|_| AppError::unauthorized())?;

        diesel::update(sessions::table.find(session.id))
            .set((
                sessions::last_used_at.eq(now),
                sessions::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        let user: User = users::table
            .find(claims.sub)
            .first(&mut conn)
            .map_err(|_| AppError::unauthorized())?;
        if !user.enabled || user.status != "active" {
            return Err(AppError::unauthorized());
        }

        let categories: Vec<String> = user_roles::table
            .inner_join(roles::table)
            .filter(user_roles::user_id.eq(user.id))
            .select(roles::category)
            .load(&mut conn)?;
        let mut role_set: Vec<RoleCategory> = Vec::with_capacity(categories.len());
        for category in categories {
            let parsed = RoleCategory::parse(&category)
                .map_err(|_| AppError::internal(format!("corrupt role category {category}")))?;
            if !role_set.contains(&parsed) {
                role_set.push(parsed);
            }
        }

        let plants: Vec<String> = user_plants::table
            .filter(user_plants::user_id.eq(user.id))
            .order(user_plants::position.asc())
            .select(user_plants::plant_code)
            .load(&mut conn)?;

        Ok(Principal {
            user_id: user.id,
            username: user.username,
            session_id: session.id,
            roles: role_set,
            plants,
            primary_plant: user.primary_plant,
        })
    }
}
