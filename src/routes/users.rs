use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    access::{self, RoleCategory, RoleRequirement},
    auth::{password, Principal},
    error::{AppError, AppResult},
    models::{NewUser, NewUserPlant, NewUserRole, Role, User},
    schema::{roles, user_plants, user_roles, users},
    state::AppState,
};

const REQUIRE_ADMIN: RoleRequirement =
    RoleRequirement::any(&[RoleCategory::Admin]).with_message("user administration requires ADMIN");

const USER_STATUSES: &[&str] = &["active", "suspended", "retired"];

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub plants: Vec<String>,
    pub primary_plant: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub enabled: bool,
    pub status: String,
    pub roles: Vec<String>,
    pub plants: Vec<String>,
    pub primary_plant: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
pub struct AssignPlantsRequest {
    pub plants: Vec<String>,
    pub primary_plant: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_ADMIN, "user:create")?;

    let username = payload.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    if payload.password.len() < 8 {
        return Err(AppError::validation("password must be at least 8 characters"));
    }

    let mut conn = state.db()?;
    let role_rows = resolve_roles(&mut conn, &payload.roles)?;
    validate_plant_invariant(&role_rows, &payload.plants)?;
    let primary_plant = resolve_primary_plant(&payload.plants, payload.primary_plant)?;

    let password_hash =
        password::hash_password(&payload.password).map_err(AppError::internal)?;
    let user_id = Uuid::new_v4();

    conn.transaction::<(), AppError, _>(|conn| {
        let new_user = NewUser {
            id: user_id,
            username: username.clone(),
            password_hash,
            primary_plant: primary_plant.clone(),
        };
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(conn)
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => AppError::validation("username is already taken"),
                other => AppError::from(other),
            })?;

        insert_roles(conn, user_id, &role_rows)?;
        insert_plants(conn, user_id, &payload.plants)?;
        Ok(())
    })?;

    let response = load_user_response(&mut conn, user_id)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_ADMIN, "user:read")?;
    let mut conn = state.db()?;
    Ok(Json(load_user_response(&mut conn, user_id)?))
}

pub async fn assign_roles(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AssignRolesRequest>,
) -> AppResult<Json<UserResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_ADMIN, "user:assign-roles")?;

    let mut conn = state.db()?;
    let role_rows = resolve_roles(&mut conn, &payload.roles)?;

    conn.transaction::<(), AppError, _>(|conn| {
        let _user: User = users::table.find(user_id).first(conn)?;
        let plants: Vec<String> = user_plants::table
            .filter(user_plants::user_id.eq(user_id))
            .select(user_plants::plant_code)
            .load(conn)?;
        validate_plant_invariant(&role_rows, &plants)?;

        diesel::delete(user_roles::table.filter(user_roles::user_id.eq(user_id)))
            .execute(conn)?;
        insert_roles(conn, user_id, &role_rows)?;
        touch_user(conn, user_id)?;
        Ok(())
    })?;

    Ok(Json(load_user_response(&mut conn, user_id)?))
}

pub async fn assign_plants(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AssignPlantsRequest>,
) -> AppResult<Json<UserResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_ADMIN, "user:assign-plants")?;

    let primary_plant = resolve_primary_plant(&payload.plants, payload.primary_plant)?;

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let _user: User = users::table.find(user_id).first(conn)?;

        let held_roles: Vec<String> = user_roles::table
            .inner_join(roles::table)
            .filter(user_roles::user_id.eq(user_id))
            .select(roles::category)
            .load(conn)?;
        if held_roles.iter().any(|c| c == "PLANT") && payload.plants.is_empty() {
            return Err(AppError::validation(
                "a PLANT user must keep at least one assigned plant",
            ));
        }

        diesel::delete(user_plants::table.filter(user_plants::user_id.eq(user_id)))
            .execute(conn)?;
        insert_plants(conn, user_id, &payload.plants)?;

        diesel::update(users::table.find(user_id))
            .set((
                users::primary_plant.eq(primary_plant.clone()),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        Ok(())
    })?;

    Ok(Json(load_user_response(&mut conn, user_id)?))
}

/// Users are never hard-deleted; retirement is a status change so access
/// logs and uploads keep resolving to a real actor.
pub async fn update_status(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> AppResult<Json<UserResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_ADMIN, "user:update-status")?;

    if !USER_STATUSES.contains(&payload.status.as_str()) {
        return Err(AppError::validation(format!(
            "status must be one of {}",
            USER_STATUSES.join(", ")
        )));
    }

    let mut conn = state.db()?;
    let updated = diesel::update(users::table.find(user_id))
        .set((
            users::status.eq(&payload.status),
            users::enabled.eq(payload.status == "active"),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    Ok(Json(load_user_response(&mut conn, user_id)?))
}

fn resolve_roles(conn: &mut PgConnection, names: &[String]) -> AppResult<Vec<Role>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<Role> = roles::table
        .filter(roles::name.eq_any(names))
        .load(conn)?;
    if rows.len() != names.len() {
        return Err(AppError::validation("one or more roles do not exist"));
    }
    Ok(rows)
}

fn validate_plant_invariant(role_rows: &[Role], plants: &[String]) -> AppResult<()> {
    let has_plant_role = role_rows.iter().any(|role| role.category == "PLANT");
    if has_plant_role && plants.is_empty() {
        return Err(AppError::validation(
            "a PLANT user needs at least one assigned plant",
        ));
    }
    Ok(())
}

fn resolve_primary_plant(
    plants: &[String],
    requested: Option<String>,
) -> AppResult<Option<String>> {
    match requested {
        Some(primary) => {
            if !plants.contains(&primary) {
                return Err(AppError::validation(
                    "primary plant must be one of the assigned plants",
                ));
            }
            Ok(Some(primary))
        }
        None => Ok(plants.first().cloned()),
    }
}

fn insert_roles(conn: &mut PgConnection, user_id: Uuid, role_rows: &[Role]) -> AppResult<()> {
    let rows: Vec<NewUserRole> = role_rows
        .iter()
        .map(|role| NewUserRole {
            user_id,
            role_name: role.name.clone(),
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(user_roles::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

fn insert_plants(conn: &mut PgConnection, user_id: Uuid, plants: &[String]) -> AppResult<()> {
    let rows: Vec<NewUserPlant> = plants
        .iter()
        .enumerate()
        .map(|(position, plant_code)| NewUserPlant {
            user_id,
            plant_code: plant_code.clone(),
            position: position as i32,
        })
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(user_plants::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(conn)?;
    }
    Ok(())
}

fn touch_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    diesel::update(users::table.find(user_id))
        .set(users::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}

fn load_user_response(conn: &mut PgConnection, user_id: Uuid) -> AppResult<UserResponse> {
    let user: User = users::table.find(user_id).first(conn)?;
    let role_names: Vec<String> = user_roles::table
        .filter(user_roles::user_id.eq(user_id))
        .order(user_roles::role_name.asc())
        .select(user_roles::role_name)
        .load(conn)?;
    let plants: Vec<String> = user_plants::table
        .filter(user_plants::user_id.eq(user_id))
        .order(user_plants::position.asc())
        .select(user_plants::plant_code)
        .load(conn)?;

    Ok(UserResponse {
        id: user.id,
        username: user.username,
        enabled: user.enabled,
        status: user.status,
        roles: role_names,
        plants,
        primary_plant: user.primary_plant,
    })
}
