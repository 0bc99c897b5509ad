use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{self, check_single, RoleCategory, RoleRequirement},
    auth::Principal,
    error::{AppError, AppResult},
    models::{NewQuery, NewQueryResponse, Query, QueryResponse, Workflow},
    schema::{queries, responses, workflows},
    state::AppState,
    workflow::{self, QueryTeam, WorkflowState},
};

const REQUIRE_REVIEWER: RoleRequirement = RoleRequirement::any(&[
    RoleCategory::Cqs,
    RoleCategory::Tech,
    RoleCategory::Jvc,
]);
const REQUIRE_PLANT: RoleRequirement = RoleRequirement::any(&[RoleCategory::Plant]);
const REQUIRE_READER: RoleRequirement = RoleRequirement::any(RoleCategory::ALL);

pub const QUERY_OPEN: &str = "OPEN";
pub const QUERY_RESOLVED: &str = "RESOLVED";
pub const QUERY_CLOSED: &str = "CLOSED";

#[derive(Deserialize)]
pub struct RaiseQueryRequest {
    pub team: String,
    pub subject: String,
    pub body: String,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub body: String,
}

#[derive(Serialize)]
pub struct QueryDetailResponse {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub team: String,
    pub status: String,
    pub subject: String,
    pub body: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub responses: Vec<ResponseBody>,
    pub workflow_state: String,
}

#[derive(Serialize)]
pub struct ResponseBody {
    pub id: Uuid,
    pub body: String,
    pub created_at: String,
}

pub async fn raise_query(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<RaiseQueryRequest>,
) -> AppResult<(StatusCode, Json<QueryDetailResponse>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_REVIEWER, "query:raise")?;

    let team = QueryTeam::parse(&payload.team)?;
    let team_role = match team {
        QueryTeam::Cqs => RoleCategory::Cqs,
        QueryTeam::Tech => RoleCategory::Tech,
        QueryTeam::Jvc => RoleCategory::Jvc,
    };
    if !principal.is_admin() && !principal.has_role(team_role) {
        return Err(AppError::access_denied(format!(
            "raising a {} query requires the {} role",
            team.as_str(),
            team_role.as_str()
        )));
    }

    let subject = payload.subject.trim().to_string();
    if subject.is_empty() {
        return Err(AppError::validation("subject must not be empty"));
    }

    let mut conn = state.db()?;
    let query_id = Uuid::new_v4();
    conn.transaction::<(), AppError, _>(|conn| {
        let record: Workflow = workflows::table
            .find(workflow_id)
            .for_update()
            .first(conn)?;

        let current = WorkflowState::parse(&record.state)?;
        if current.is_terminal() {
            return Err(AppError::validation(
                "queries cannot be raised against a completed workflow",
            ));
        }

        let new_query = NewQuery {
            id: query_id,
            workflow_id,
            team: team.as_str().to_string(),
            status: QUERY_OPEN.to_string(),
            subject: subject.clone(),
            body: payload.body.clone(),
            raised_by: principal.user_id,
        };
        diesel::insert_into(queries::table)
            .values(&new_query)
            .execute(conn)?;

        // A new open query pulls the workflow into that team's pending
        // state; a second query for the team the workflow already waits on
        // changes nothing.
        let target = team.pending_state();
        if target != current {
            workflow::validate_transition(current, target)?;
            diesel::update(workflows::table.find(workflow_id))
                .set((
                    workflows::state.eq(target.as_str()),
                    workflows::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
        }

        info!(
            query_id = %query_id,
            workflow_id = %workflow_id,
            team = %team.as_str(),
            "query raised"
        );
        Ok(())
    })?;

    let detail = load_query_detail(&mut conn, query_id)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_queries(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<Vec<QueryDetailResponse>>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "query:list")?;

    let mut conn = state.db()?;
    let record: Workflow = workflows::table.find(workflow_id).first(&mut conn)?;
    check_single(&principal, &record, true)?;

    let rows: Vec<Query> = queries::table
        .filter(queries::workflow_id.eq(workflow_id))
        .order(queries::created_at.desc())
        .load(&mut conn)?;

    let mut details = Vec::with_capacity(rows.len());
    for row in rows {
        details.push(to_query_detail(&mut conn, row, &record.state)?);
    }
    Ok(Json(details))
}

pub async fn get_query(
    State(state): State<AppState>,
    principal: Principal,
    Path(query_id): Path<Uuid>,
) -> AppResult<Json<QueryDetailResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "query:read")?;

    let mut conn = state.db()?;
    let row: Query = queries::table.find(query_id).first(&mut conn)?;
    let record: Workflow = workflows::table.find(row.workflow_id).first(&mut conn)?;
    check_single(&principal, &record, true)?;

    let detail = to_query_detail(&mut conn, row, &record.state)?;
    Ok(Json(detail))
}

/// Plant answers a query. The response resolves the query and the workflow
/// state is re-derived from whatever is still open, all in one transaction
/// so the state/open-query pair can never be observed inconsistent.
pub async fn respond_to_query(
    State(state): State<AppState>,
    principal: Principal,
    Path(query_id): Path<Uuid>,
    Json(payload): Json<RespondRequest>,
) -> AppResult<(StatusCode, Json<QueryDetailResponse>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_PLANT, "query:respond")?;

    let body = payload.body.trim().to_string();
    if body.is_empty() {
        return Err(AppError::validation("response body must not be empty"));
    }

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let row: Query = queries::table.find(query_id).first(conn)?;
        let record: Workflow = workflows::table
            .find(row.workflow_id)
            .for_update()
            .first(conn)?;
        check_single(&principal, &record, true)?;

        match row.status.as_str() {
            QUERY_OPEN => {}
            QUERY_RESOLVED => {
                return Err(AppError::validation("query is already resolved"))
            }
            _ => return Err(AppError::validation("closed queries are read-only")),
        }

        let now = Utc::now().naive_utc();
        let new_response = NewQueryResponse {
            id: Uuid::new_v4(),
            query_id,
            body,
            responder_id: principal.user_id,
        };
        diesel::insert_into(responses::table)
            .values(&new_response)
            .execute(conn)?;

        diesel::update(queries::table.find(query_id))
            .set((
                queries::status.eq(QUERY_RESOLVED),
                queries::resolved_at.eq(now),
                queries::updated_at.eq(now),
            ))
            .execute(conn)?;

        rederive_workflow_state(conn, &record)?;

        info!(query_id = %query_id, workflow_id = %record.id, "query resolved");
        Ok(())
    })?;

    let detail = load_query_detail(&mut conn, query_id)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn close_query(
    State(state): State<AppState>,
    principal: Principal,
    Path(query_id): Path<Uuid>,
) -> AppResult<Json<QueryDetailResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_REVIEWER, "query:close")?;

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let row: Query = queries::table.find(query_id).first(conn)?;
        let record: Workflow = workflows::table
            .find(row.workflow_id)
            .for_update()
            .first(conn)?;

        let team = QueryTeam::parse(&row.team)?;
        let team_role = match team {
            QueryTeam::Cqs => RoleCategory::Cqs,
            QueryTeam::Tech => RoleCategory::Tech,
            QueryTeam::Jvc => RoleCategory::Jvc,
        };
        if !principal.is_admin() && !principal.has_role(team_role) {
            return Err(AppError::access_denied(
                "only the raising team or an administrator may close a query",
            ));
        }

        if row.status == QUERY_CLOSED {
            return Err(AppError::validation("query is already closed"));
        }
        let was_open = row.status == QUERY_OPEN;

        let now = Utc::now().naive_utc();
        diesel::update(queries::table.find(query_id))
            .set((queries::status.eq(QUERY_CLOSED), queries::updated_at.eq(now)))
            .execute(conn)?;

        if was_open {
            rederive_workflow_state(conn, &record)?;
        }

        info!(query_id = %query_id, workflow_id = %record.id, "query closed");
        Ok(())
    })?;

    let detail = load_query_detail(&mut conn, query_id)?;
    Ok(Json(detail))
}

/// Recomputes the owning workflow's state from its still-open queries
/// (newest first). Must run inside the caller's transaction.
fn rederive_workflow_state(conn: &mut PgConnection, record: &Workflow) -> AppResult<()> {
    let open_teams_raw: Vec<String> = queries::table
        .filter(queries::workflow_id.eq(record.id))
        .filter(queries::status.eq(QUERY_OPEN))
        .order(queries::created_at.desc())
        .select(queries::team)
        .load(conn)?;

    let mut open_teams = Vec::with_capacity(open_teams_raw.len());
    for team in &open_teams_raw {
        open_teams.push(QueryTeam::parse(team)?);
    }

    let current = WorkflowState::parse(&record.state)?;
    let derived = workflow::derive_state(&open_teams);
    if derived != current {
        workflow::validate_transition(current, derived)?;
        diesel::update(workflows::table.find(record.id))
            .set((
                workflows::state.eq(derived.as_str()),
                workflows::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
    }
    Ok(())
}

fn load_query_detail(conn: &mut PgConnection, query_id: Uuid) -> AppResult<QueryDetailResponse> {
    let row: Query = queries::table.find(query_id).first(conn)?;
    let record: Workflow = workflows::table.find(row.workflow_id).first(conn)?;
    to_query_detail(conn, row, &record.state)
}

fn to_query_detail(
    conn: &mut PgConnection,
    row: Query,
    workflow_state: &str,
) -> AppResult<QueryDetailResponse> {
    let response_rows: Vec<QueryResponse> = responses::table
        .filter(responses::query_id.eq(row.id))
        .order(responses::created_at.asc())
        .load(conn)?;

    Ok(QueryDetailResponse {
        id: row.id,
        workflow_id: row.workflow_id,
        team: row.team,
        status: row.status,
        subject: row.subject,
        body: row.body,
        created_at: super::workflows::to_iso(row.created_at),
        resolved_at: row.resolved_at.map(super::workflows::to_iso),
        responses: response_rows
            .into_iter()
            .map(|r| ResponseBody {
                id: r.id,
                body: r.body,
                created_at: super::workflows::to_iso(r.created_at),
            })
            .collect(),
        workflow_state: workflow_state.to_string(),
    })
}
