use axum::{
    extract::{Path, Query as AxumQuery, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::{self, check_single, filter_list, filter_page, Page, RoleCategory, RoleRequirement},
    auth::Principal,
    error::{AppError, AppResult},
    models::{NewWorkflow, PlantMaterialData, Workflow},
    plant_material,
    schema::{plant_material_data, queries, workflows},
    state::AppState,
    workflow::{self, QueryTeam, WorkflowState},
};

const REQUIRE_JVC: RoleRequirement =
    RoleRequirement::any(&[RoleCategory::Jvc]).with_message("only JVC may open a workflow");
const REQUIRE_PLANT: RoleRequirement = RoleRequirement::any(&[RoleCategory::Plant]);
const REQUIRE_STAFF: RoleRequirement = RoleRequirement::any(&[
    RoleCategory::Jvc,
    RoleCategory::Cqs,
    RoleCategory::Tech,
    RoleCategory::Plant,
]);
const REQUIRE_READER: RoleRequirement = RoleRequirement::any(RoleCategory::ALL);

/// Questionnaire fields that must be answered before a workflow can be
/// marked complete.
pub const REQUIRED_ANSWER_FIELDS: &[&str] = &[
    "materialName",
    "supplierName",
    "casNumber",
    "storageClass",
    "intendedUse",
];

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    pub project_code: String,
    pub material_code: String,
    pub plant_code: String,
}

#[derive(Deserialize)]
pub struct WorkflowListQuery {
    pub project_code: Option<String>,
    pub material_code: Option<String>,
    pub state: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub target: String,
}

#[derive(Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: Value,
}

#[derive(Serialize)]
pub struct WorkflowResponse {
    pub id: Uuid,
    pub project_code: String,
    pub material_code: String,
    pub plant_code: String,
    pub state: String,
    pub answers: Value,
    pub open_queries: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub async fn create_workflow(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<CreateWorkflowRequest>,
) -> AppResult<(StatusCode, Json<WorkflowResponse>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_JVC, "workflow:create")?;

    let project_code = payload.project_code.trim().to_uppercase();
    let material_code = payload.material_code.trim().to_uppercase();
    let plant_code = payload.plant_code.trim().to_uppercase();
    if project_code.is_empty() || material_code.is_empty() || plant_code.is_empty() {
        return Err(AppError::validation(
            "project_code, material_code and plant_code are required",
        ));
    }

    let mut conn = state.db()?;
    let new_workflow = NewWorkflow {
        id: Uuid::new_v4(),
        project_code,
        material_code,
        plant_code,
        state: WorkflowState::JvcPending.as_str().to_string(),
        answers: Value::Object(Default::default()),
        created_by: principal.user_id,
    };

    diesel::insert_into(workflows::table)
        .values(&new_workflow)
        .execute(&mut conn)
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => AppError::validation(
                "a workflow for this project and material already exists",
            ),
            other => AppError::from(other),
        })?;

    info!(
        workflow_id = %new_workflow.id,
        project_code = %new_workflow.project_code,
        material_code = %new_workflow.material_code,
        "workflow created"
    );

    let record: Workflow = workflows::table.find(new_workflow.id).first(&mut conn)?;
    let response = to_workflow_response(&mut conn, record)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_workflows(
    State(state): State<AppState>,
    principal: Principal,
    AxumQuery(params): AxumQuery<WorkflowListQuery>,
) -> AppResult<Json<Value>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "workflow:list")?;

    let mut conn = state.db()?;
    let mut query = workflows::table.into_boxed();

    if let Some(project_code) = params.project_code.as_deref() {
        query = query.filter(workflows::project_code.eq(project_code.to_uppercase()));
    }
    if let Some(material_code) = params.material_code.as_deref() {
        query = query.filter(workflows::material_code.eq(material_code.to_uppercase()));
    }
    if let Some(state_param) = params.state.as_deref() {
        let parsed = WorkflowState::parse(state_param)
            .map_err(|_| AppError::validation(format!("unknown state {state_param}")))?;
        query = query.filter(workflows::state.eq(parsed.as_str()));
    }

    let records: Vec<Workflow> = query.order(workflows::created_at.desc()).load(&mut conn)?;

    // The plant filter runs on the fetched rows: it is the safety net on top
    // of query-time scoping, never a replacement for it.
    match params.page {
        Some(page) => {
            let per_page = params.per_page.unwrap_or(50).clamp(1, 200);
            let page = page.max(1);
            let filtered = filter_page(
                &principal,
                Page {
                    total: records.len() as i64,
                    items: records,
                    page,
                    per_page,
                },
            );
            let start = ((page - 1) * per_page) as usize;
            let items: Vec<WorkflowResponse> = filtered
                .items
                .into_iter()
                .skip(start)
                .take(per_page as usize)
                .map(|record| to_workflow_response(&mut conn, record))
                .collect::<AppResult<_>>()?;
            Ok(Json(serde_json::json!({
                "items": items,
                "total": filtered.total,
                "page": filtered.page,
                "per_page": filtered.per_page,
            })))
        }
        None => {
            let items: Vec<WorkflowResponse> = filter_list(&principal, records)
                .into_iter()
                .map(|record| to_workflow_response(&mut conn, record))
                .collect::<AppResult<_>>()?;
            Ok(Json(serde_json::to_value(items)?))
        }
    }
}

pub async fn get_workflow(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<WorkflowResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "workflow:read")?;

    let mut conn = state.db()?;
    let record: Workflow = workflows::table.find(workflow_id).first(&mut conn)?;
    check_single(&principal, &record, true)?;

    let response = to_workflow_response(&mut conn, record)?;
    Ok(Json(response))
}

pub async fn transition_workflow(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<WorkflowResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_STAFF, "workflow:transition")?;

    let target = WorkflowState::parse(&payload.target)
        .map_err(|_| AppError::validation(format!("unknown target state {}", payload.target)))?;
    if target == WorkflowState::Completed {
        return Err(AppError::validation(
            "completion goes through the complete endpoint",
        ));
    }

    let mut conn = state.db()?;
    let record = conn.transaction::<Workflow, AppError, _>(|conn| {
        let record: Workflow = workflows::table
            .find(workflow_id)
            .for_update()
            .first(conn)?;
        check_single(&principal, &record, true)?;

        let current = WorkflowState::parse(&record.state)?;
        workflow::validate_transition(current, target)?;

        // A query state holds as long as that team still has an open query;
        // moving the record elsewhere by hand would detach state from the
        // open-query set. The record leaves on resolve/close instead.
        if let Some(team) = current.pending_team() {
            let open: i64 = queries::table
                .filter(queries::workflow_id.eq(workflow_id))
                .filter(queries::team.eq(team.as_str()))
                .filter(queries::status.eq("OPEN"))
                .count()
                .get_result(conn)?;
            if open > 0 {
                return Err(AppError::validation(format!(
                    "cannot leave {} while {} open {} queries remain; resolve or close them first",
                    current.as_str(),
                    open,
                    team.as_str()
                )));
            }
        }

        // Review-team pending states are only entered on the back of an open
        // query; a bare transition into one would break the state/open-query
        // invariant.
        if matches!(target, WorkflowState::CqsPending | WorkflowState::TechPending) {
            let team = match target {
                WorkflowState::CqsPending => QueryTeam::Cqs,
                _ => QueryTeam::Tech,
            };
            let open: i64 = queries::table
                .filter(queries::workflow_id.eq(workflow_id))
                .filter(queries::team.eq(team.as_str()))
                .filter(queries::status.eq("OPEN"))
                .count()
                .get_result(conn)?;
            if open == 0 {
                return Err(AppError::validation(format!(
                    "cannot enter {} without an open {} query",
                    target.as_str(),
                    team.as_str()
                )));
            }
        }

        diesel::update(workflows::table.find(workflow_id))
            .set((
                workflows::state.eq(target.as_str()),
                workflows::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        info!(
            workflow_id = %workflow_id,
            from = %current.as_str(),
            to = %target.as_str(),
            actor = %principal.username,
            "workflow transitioned"
        );

        Ok(workflows::table.find(workflow_id).first(conn)?)
    })?;

    let response = to_workflow_response(&mut conn, record)?;
    Ok(Json(response))
}

/// Plant answer submission. Deliberately allowed while queries are open so
/// review questions never block form work.
pub async fn submit_answers(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> AppResult<Json<WorkflowResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_PLANT, "workflow:answers")?;

    let submitted = match payload.answers {
        Value::Object(map) => map,
        _ => return Err(AppError::validation("answers must be a JSON object")),
    };

    let mut conn = state.db()?;
    let record = conn.transaction::<Workflow, AppError, _>(|conn| {
        let record: Workflow = workflows::table
            .find(workflow_id)
            .for_update()
            .first(conn)?;
        check_single(&principal, &record, true)?;

        let current = WorkflowState::parse(&record.state)?;
        if current.is_terminal() {
            return Err(AppError::validation(
                "a completed workflow can no longer be edited",
            ));
        }

        let mut answers = match record.answers.clone() {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        for (key, value) in submitted {
            answers.insert(key, value);
        }

        let master: Option<PlantMaterialData> = plant_material_data::table
            .find((record.plant_code.clone(), record.material_code.clone()))
            .first(conn)
            .optional()?;
        if let Some(master) = master {
            plant_material::apply_defaults(&mut answers, &master);
        }

        diesel::update(workflows::table.find(workflow_id))
            .set((
                workflows::answers.eq(Value::Object(answers)),
                workflows::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        Ok(workflows::table.find(workflow_id).first(conn)?)
    })?;

    let response = to_workflow_response(&mut conn, record)?;
    Ok(Json(response))
}

pub async fn complete_workflow(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<WorkflowResponse>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_PLANT, "workflow:complete")?;

    let mut conn = state.db()?;
    let record = conn.transaction::<Workflow, AppError, _>(|conn| {
        let record: Workflow = workflows::table
            .find(workflow_id)
            .for_update()
            .first(conn)?;
        check_single(&principal, &record, true)?;

        let current = WorkflowState::parse(&record.state)?;
        workflow::validate_transition(current, WorkflowState::Completed)?;

        let missing: Vec<&str> = REQUIRED_ANSWER_FIELDS
            .iter()
            .copied()
            .filter(|field| {
                record
                    .answers
                    .get(field)
                    .map(|value| value.is_null() || value == "")
                    .unwrap_or(true)
            })
            .collect();
        if !missing.is_empty() {
            return Err(AppError::validation(format!(
                "questionnaire incomplete, missing: {}",
                missing.join(", ")
            )));
        }

        let open_queries: i64 = queries::table
            .filter(queries::workflow_id.eq(workflow_id))
            .filter(queries::status.eq("OPEN"))
            .count()
            .get_result(conn)?;
        if open_queries > 0 {
            return Err(AppError::validation(
                "all queries must be resolved or closed before completion",
            ));
        }

        diesel::update(workflows::table.find(workflow_id))
            .set((
                workflows::state.eq(WorkflowState::Completed.as_str()),
                workflows::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        info!(workflow_id = %workflow_id, actor = %principal.username, "workflow completed");

        Ok(workflows::table.find(workflow_id).first(conn)?)
    })?;

    let response = to_workflow_response(&mut conn, record)?;
    Ok(Json(response))
}

fn to_workflow_response(
    conn: &mut PgConnection,
    record: Workflow,
) -> AppResult<WorkflowResponse> {
    let open_queries: i64 = queries::table
        .filter(queries::workflow_id.eq(record.id))
        .filter(queries::status.eq("OPEN"))
        .count()
        .get_result(conn)?;

    Ok(WorkflowResponse {
        id: record.id,
        project_code: record.project_code,
        material_code: record.material_code,
        plant_code: record.plant_code,
        state: record.state,
        answers: record.answers,
        open_queries,
        created_at: to_iso(record.created_at),
        updated_at: to_iso(record.updated_at),
    })
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    chrono::DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
