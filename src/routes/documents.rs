use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, Query as AxumQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    access::{self, check_single, RoleCategory, RoleRequirement},
    auth::Principal,
    docpolicy,
    error::{AppError, AppResult},
    models::{Document, NewAccessLog, NewDocument, Query, QueryResponse, Workflow},
    schema::{access_logs, documents, queries, responses, workflows},
    state::AppState,
};

const REQUIRE_UPLOADER: RoleRequirement = RoleRequirement::any(&[
    RoleCategory::Jvc,
    RoleCategory::Cqs,
    RoleCategory::Tech,
    RoleCategory::Plant,
]);
const REQUIRE_READER: RoleRequirement = RoleRequirement::any(RoleCategory::ALL);

pub const OUTCOME_GRANTED: &str = "GRANTED";
pub const OUTCOME_DENIED: &str = "DENIED";
pub const OUTCOME_NOT_FOUND: &str = "NOT_FOUND";

const DEFAULT_SOURCE: &str = "UPLOAD";

/// Where a document hangs in the questionnaire: directly on the workflow, on
/// a reviewer query, or on a plant response to a query. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentContext {
    Workflow(Uuid),
    Query(Uuid),
    Response { query_id: Uuid, response_id: Uuid },
}

impl DocumentContext {
    fn column_values(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        match *self {
            DocumentContext::Workflow(id) => (Some(id), None, None),
            DocumentContext::Query(id) => (None, Some(id), None),
            DocumentContext::Response {
                query_id,
                response_id,
            } => (None, Some(query_id), Some(response_id)),
        }
    }

    fn parse(
        kind: Option<&str>,
        workflow_id: Option<Uuid>,
        query_id: Option<Uuid>,
        response_id: Option<Uuid>,
    ) -> AppResult<Self> {
        match kind {
            Some("workflow") => {
                if query_id.is_some() || response_id.is_some() {
                    return Err(AppError::invalid_context(
                        "workflow context must not carry query or response ids",
                    ));
                }
                let id = workflow_id
                    .ok_or_else(|| AppError::invalid_context("workflow context needs workflow_id"))?;
                Ok(DocumentContext::Workflow(id))
            }
            Some("query") => {
                if workflow_id.is_some() || response_id.is_some() {
                    return Err(AppError::invalid_context(
                        "query context must carry exactly query_id",
                    ));
                }
                let id = query_id
                    .ok_or_else(|| AppError::invalid_context("query context needs query_id"))?;
                Ok(DocumentContext::Query(id))
            }
            Some("response") => {
                if workflow_id.is_some() {
                    return Err(AppError::invalid_context(
                        "response context must not carry workflow_id",
                    ));
                }
                match (query_id, response_id) {
                    (Some(query_id), Some(response_id)) => Ok(DocumentContext::Response {
                        query_id,
                        response_id,
                    }),
                    _ => Err(AppError::invalid_context(
                        "response context needs query_id and response_id",
                    )),
                }
            }
            Some(other) => Err(AppError::invalid_context(format!(
                "unknown context {other}, expected workflow, query or response"
            ))),
            None => Err(AppError::invalid_context("missing context field")),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub response_id: Option<Uuid>,
    pub project_code: String,
    pub material_code: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub source: String,
    pub is_reused: bool,
    pub uploaded_at: String,
}

#[derive(Deserialize)]
pub struct ReusableQuery {
    pub project_code: Option<String>,
    pub material_code: Option<String>,
    pub source: Option<String>,
}

#[derive(Deserialize)]
pub struct ReuseRequest {
    pub context: String,
    pub workflow_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub response_id: Option<Uuid>,
}

struct UploadFile {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Multipart upload of one or more evidence files into a single context.
/// Validation runs over the whole batch first; one bad file rejects all of
/// them with a per-file reason map.
pub async fn upload_documents(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Vec<DocumentResponse>>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_UPLOADER, "document:upload")?;

    let mut context_kind: Option<String> = None;
    let mut workflow_id: Option<Uuid> = None;
    let mut query_id: Option<Uuid> = None;
    let mut response_id: Option<Uuid> = None;
    let mut source: Option<String> = None;
    let mut files: Vec<UploadFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::validation(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "context" => context_kind = Some(read_text_field(field).await?),
            "workflow_id" => workflow_id = Some(read_uuid_field(field, "workflow_id").await?),
            "query_id" => query_id = Some(read_uuid_field(field, "query_id").await?),
            "response_id" => response_id = Some(read_uuid_field(field, "response_id").await?),
            "source" => source = Some(read_text_field(field).await?),
            "files" => {
                let filename = field
                    .file_name()
                    .map(|f| f.to_string())
                    .ok_or_else(|| AppError::validation("file part without a filename"))?;
                let content_type = field.content_type().map(|c| c.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::validation(format!("failed to read {filename}: {err}")))?
                    .to_vec();
                files.push(UploadFile {
                    filename,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(AppError::validation("no files in upload"));
    }

    let context = DocumentContext::parse(
        context_kind.as_deref(),
        workflow_id,
        query_id,
        response_id,
    )?;
    let source = source
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    if source.len() > 32 {
        return Err(AppError::validation("source must be at most 32 characters"));
    }

    let mut conn = state.db()?;
    let workflow = resolve_owning_workflow(&mut conn, &context)?;
    check_single(&principal, &workflow, true)?;

    let mut rejections: BTreeMap<String, String> = BTreeMap::new();
    for file in &files {
        if let Err(reason) = docpolicy::validate_file(
            &file.filename,
            file.content_type.as_deref(),
            file.bytes.len() as i64,
        ) {
            rejections.insert(file.filename.clone(), reason);
        }
    }
    if !rejections.is_empty() {
        return Err(AppError::validation_fields(
            "one or more files were rejected, nothing was stored",
            rejections,
        ));
    }

    // Objects are stored before rows are written; a failed insert leaves an
    // orphan object under its content hash, which a later upload of the same
    // bytes simply reuses.
    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        let storage_key = content_key(&file.bytes);
        state
            .storage
            .put_object(&storage_key, file.bytes.clone(), file.content_type.clone())
            .await
            .map_err(AppError::storage)?;
        staged.push((file, storage_key));
    }

    let (ctx_workflow, ctx_query, ctx_response) = context.column_values();
    let mut created = Vec::with_capacity(staged.len());
    conn.transaction::<(), AppError, _>(|conn| {
        for (file, storage_key) in &staged {
            let row = NewDocument {
                id: Uuid::new_v4(),
                workflow_id: ctx_workflow,
                query_id: ctx_query,
                response_id: ctx_response,
                project_code: workflow.project_code.clone(),
                material_code: workflow.material_code.clone(),
                original_name: file.filename.clone(),
                content_type: file.content_type.clone(),
                storage_key: storage_key.clone(),
                size_bytes: file.bytes.len() as i64,
                source: source.clone(),
                is_reused: false,
                uploaded_by: principal.user_id,
            };
            diesel::insert_into(documents::table)
                .values(&row)
                .execute(conn)?;
            created.push(row.id);
        }
        Ok(())
    })?;

    info!(
        count = created.len(),
        workflow_id = %workflow.id,
        "documents uploaded"
    );

    let rows: Vec<Document> = documents::table
        .filter(documents::id.eq_any(&created))
        .order(documents::uploaded_at.asc())
        .load(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(rows.into_iter().map(to_document_response).collect()),
    ))
}

/// Streams a document back to the caller. Every attempt is written to the
/// access log, including denials and misses, before the response is built.
pub async fn download_document(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(document_id): Path<Uuid>,
) -> AppResult<Response> {
    let ip = client_ip(&headers);
    let mut conn = state.db()?;

    // Role-guard denials land in the access log like every other refused
    // attempt on this endpoint.
    if let Err(err) =
        access::authorize(&*state.audit, &principal, &REQUIRE_READER, "document:download")
    {
        record_access(&mut conn, document_id, &principal, ip, OUTCOME_DENIED)?;
        return Err(err);
    }

    let document: Option<Document> = documents::table
        .find(document_id)
        .filter(documents::deleted_at.is_null())
        .first(&mut conn)
        .optional()?;

    let document = match document {
        Some(document) => document,
        None => {
            record_access(&mut conn, document_id, &principal, ip, OUTCOME_NOT_FOUND)?;
            return Err(AppError::not_found());
        }
    };

    // Viewers only see evidence attached directly to the workflow; query
    // and response attachments stay inside the review loop.
    let viewer_only = !principal.is_admin()
        && principal.roles.iter().all(|r| *r == RoleCategory::Viewer);
    if viewer_only && document.workflow_id.is_none() {
        record_access(&mut conn, document_id, &principal, ip, OUTCOME_DENIED)?;
        return Err(AppError::access_denied(
            "viewers may only download workflow documents",
        ));
    }

    let workflow = resolve_document_workflow(&mut conn, &document)?;
    if check_single(&principal, &workflow, true).is_err() {
        record_access(&mut conn, document_id, &principal, ip, OUTCOME_DENIED)?;
        return Err(AppError::access_denied(
            "document belongs to a plant outside your assignment",
        ));
    }

    let bytes = match state.storage.get_object(&document.storage_key).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(document_id = %document_id, error = %err, "storage fetch failed");
            record_access(&mut conn, document_id, &principal, ip, OUTCOME_DENIED)?;
            return Err(AppError::storage(err));
        }
    };

    record_access(&mut conn, document_id, &principal, ip, OUTCOME_GRANTED)?;

    let content_type = document
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            attachment_disposition(&document.original_name),
        )
        .body(axum::body::Body::from(bytes))
        .map_err(AppError::internal)?;
    Ok(response)
}

/// Search for documents that can be reused on another questionnaire for the
/// same material. Soft-deleted rows never show up here.
pub async fn search_reusable(
    State(state): State<AppState>,
    principal: Principal,
    AxumQuery(params): AxumQuery<ReusableQuery>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_UPLOADER, "document:search")?;

    if params.project_code.is_none() && params.material_code.is_none() {
        return Err(AppError::validation(
            "search needs project_code or material_code",
        ));
    }

    let mut conn = state.db()?;
    let mut query = documents::table
        .filter(documents::deleted_at.is_null())
        .into_boxed();
    if let Some(project_code) = &params.project_code {
        query = query.filter(documents::project_code.eq(project_code.to_uppercase()));
    }
    if let Some(material_code) = &params.material_code {
        query = query.filter(documents::material_code.eq(material_code.to_uppercase()));
    }
    if let Some(source) = &params.source {
        query = query.filter(documents::source.eq(source.to_uppercase()));
    }
    let rows: Vec<Document> = query.order(documents::uploaded_at.desc()).load(&mut conn)?;

    let visible = filter_by_owning_plant(&mut conn, &principal, rows)?;
    Ok(Json(visible.into_iter().map(to_document_response).collect()))
}

/// Attaches an existing stored object to a new context. No bytes move; the
/// new row points at the same content hash and is flagged as reused.
pub async fn reuse_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<ReuseRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    access::authorize(&*state.audit, &principal, &REQUIRE_UPLOADER, "document:reuse")?;

    let context = DocumentContext::parse(
        Some(payload.context.as_str()),
        payload.workflow_id,
        payload.query_id,
        payload.response_id,
    )?;

    let mut conn = state.db()?;
    let original: Document = documents::table
        .find(document_id)
        .filter(documents::deleted_at.is_null())
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let source_workflow = resolve_document_workflow(&mut conn, &original)?;
    check_single(&principal, &source_workflow, true)?;

    let target_workflow = resolve_owning_workflow(&mut conn, &context)?;
    check_single(&principal, &target_workflow, true)?;

    let (ctx_workflow, ctx_query, ctx_response) = context.column_values();
    let row = NewDocument {
        id: Uuid::new_v4(),
        workflow_id: ctx_workflow,
        query_id: ctx_query,
        response_id: ctx_response,
        project_code: target_workflow.project_code.clone(),
        material_code: target_workflow.material_code.clone(),
        original_name: original.original_name.clone(),
        content_type: original.content_type.clone(),
        storage_key: original.storage_key.clone(),
        size_bytes: original.size_bytes,
        source: original.source.clone(),
        is_reused: true,
        uploaded_by: principal.user_id,
    };
    diesel::insert_into(documents::table)
        .values(&row)
        .execute(&mut conn)?;

    info!(
        original = %original.id,
        reused_as = %row.id,
        workflow_id = %target_workflow.id,
        "document reused"
    );

    let created: Document = documents::table.find(row.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(to_document_response(created))))
}

/// Soft delete. The stored object stays behind its content hash because
/// reused rows may still reference it; access logs keep the document id.
pub async fn delete_document(
    State(state): State<AppState>,
    principal: Principal,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    access::authorize(&*state.audit, &principal, &REQUIRE_UPLOADER, "document:delete")?;

    let mut conn = state.db()?;
    let document: Document = documents::table
        .find(document_id)
        .filter(documents::deleted_at.is_null())
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !principal.is_admin() && document.uploaded_by != principal.user_id {
        return Err(AppError::access_denied(
            "only the uploader or an administrator may delete a document",
        ));
    }

    diesel::update(documents::table.find(document_id))
        .set(documents::deleted_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    info!(document_id = %document_id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_workflow_documents(
    State(state): State<AppState>,
    principal: Principal,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "document:list")?;

    let mut conn = state.db()?;
    let workflow: Workflow = workflows::table.find(workflow_id).first(&mut conn)?;
    check_single(&principal, &workflow, true)?;

    let rows: Vec<Document> = documents::table
        .filter(documents::workflow_id.eq(workflow_id))
        .filter(documents::deleted_at.is_null())
        .order(documents::uploaded_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(to_document_response).collect()))
}

pub async fn list_query_documents(
    State(state): State<AppState>,
    principal: Principal,
    Path(query_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    access::authorize(&*state.audit, &principal, &REQUIRE_READER, "document:list")?;

    let mut conn = state.db()?;
    let query: Query = queries::table.find(query_id).first(&mut conn)?;
    let workflow: Workflow = workflows::table.find(query.workflow_id).first(&mut conn)?;
    check_single(&principal, &workflow, true)?;

    let rows: Vec<Document> = documents::table
        .filter(documents::query_id.eq(query_id))
        .filter(documents::deleted_at.is_null())
        .order(documents::uploaded_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(to_document_response).collect()))
}

fn resolve_owning_workflow(
    conn: &mut PgConnection,
    context: &DocumentContext,
) -> AppResult<Workflow> {
    match *context {
        DocumentContext::Workflow(id) => {
            let workflow: Option<Workflow> =
                workflows::table.find(id).first(conn).optional()?;
            workflow.ok_or_else(|| AppError::invalid_context("workflow does not exist"))
        }
        DocumentContext::Query(id) => {
            let query: Option<Query> = queries::table.find(id).first(conn).optional()?;
            let query =
                query.ok_or_else(|| AppError::invalid_context("query does not exist"))?;
            Ok(workflows::table.find(query.workflow_id).first(conn)?)
        }
        DocumentContext::Response {
            query_id,
            response_id,
        } => {
            let response: Option<QueryResponse> =
                responses::table.find(response_id).first(conn).optional()?;
            let response = response
                .ok_or_else(|| AppError::invalid_context("response does not exist"))?;
            if response.query_id != query_id {
                return Err(AppError::invalid_context(
                    "response does not belong to the given query",
                ));
            }
            let query: Query = queries::table.find(query_id).first(conn)?;
            Ok(workflows::table.find(query.workflow_id).first(conn)?)
        }
    }
}

fn resolve_document_workflow(
    conn: &mut PgConnection,
    document: &Document,
) -> AppResult<Workflow> {
    let context = if let Some(workflow_id) = document.workflow_id {
        DocumentContext::Workflow(workflow_id)
    } else if let (Some(query_id), Some(response_id)) = (document.query_id, document.response_id) {
        DocumentContext::Response {
            query_id,
            response_id,
        }
    } else if let Some(query_id) = document.query_id {
        DocumentContext::Query(query_id)
    } else {
        return Err(AppError::internal("document row without a context"));
    };
    resolve_owning_workflow(conn, &context)
}

fn filter_by_owning_plant(
    conn: &mut PgConnection,
    principal: &Principal,
    rows: Vec<Document>,
) -> AppResult<Vec<Document>> {
    if crate::access::plant::is_plant_exempt(principal) {
        return Ok(rows);
    }
    let mut visible = Vec::with_capacity(rows.len());
    for row in rows {
        let workflow = resolve_document_workflow(conn, &row)?;
        if principal.plants.iter().any(|p| p == &workflow.plant_code) {
            visible.push(row);
        }
    }
    Ok(visible)
}

fn record_access(
    conn: &mut PgConnection,
    document_id: Uuid,
    principal: &Principal,
    ip: Option<String>,
    outcome: &str,
) -> AppResult<()> {
    let row = NewAccessLog {
        id: Uuid::new_v4(),
        document_id,
        user_id: principal.user_id,
        ip,
        outcome: outcome.to_string(),
    };
    diesel::insert_into(access_logs::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn content_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn attachment_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();
    let encoded = utf8_percent_encode(&sanitized, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}")
}

fn to_document_response(document: Document) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        workflow_id: document.workflow_id,
        query_id: document.query_id,
        response_id: document.response_id,
        project_code: document.project_code,
        material_code: document.material_code,
        original_name: document.original_name,
        content_type: document.content_type,
        size_bytes: document.size_bytes,
        source: document.source,
        is_reused: document.is_reused,
        uploaded_at: super::workflows::to_iso(document.uploaded_at),
    }
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|err| AppError::validation(format!("malformed field: {err}")))
}

async fn read_uuid_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> AppResult<Uuid> {
    let raw = read_text_field(field).await?;
    raw.trim()
        .parse()
        .map_err(|_| AppError::invalid_context(format!("{name} is not a valid uuid")))
}
