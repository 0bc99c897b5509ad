mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct WorkflowBody {
    id: Uuid,
    project_code: String,
    state: String,
    open_queries: i64,
}

#[derive(Deserialize)]
struct QueryBody {
    id: Uuid,
    status: String,
    workflow_state: String,
}

async fn create_workflow(
    app: &TestApp,
    token: &str,
    project: &str,
    material: &str,
    plant: &str,
) -> Result<WorkflowBody> {
    let response = app
        .post_json(
            "/api/workflows",
            &json!({
                "project_code": project,
                "material_code": material,
                "plant_code": plant,
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn transition(
    app: &TestApp,
    token: &str,
    workflow_id: Uuid,
    target: &str,
) -> Result<hyper::Response<axum::body::Body>> {
    app.post_json(
        &format!("/api/workflows/{workflow_id}/transition"),
        &json!({ "target": target }),
        Some(token),
    )
    .await
}

const FULL_ANSWERS: &str = r#"{
    "materialName": "Methanol technical grade",
    "supplierName": "ChemSupply GmbH",
    "casNumber": "67-56-1",
    "storageClass": "3",
    "intendedUse": "solvent"
}"#;

#[tokio::test]
async fn questionnaire_runs_from_creation_to_completion() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("plant", "pass-plant", &["PLANT"], &["P1"])
        .await?;
    app.insert_user("cqs", "pass-cqs-1", &["CQS"], &[]).await?;

    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let plant = app.login_token("plant", "pass-plant").await?;
    let cqs = app.login_token("cqs", "pass-cqs-1").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    assert_eq!(wf.state, "JVC_PENDING");
    assert_eq!(wf.project_code, "PRJ1");

    let response = transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;
    assert_eq!(response.status(), StatusCode::OK);

    let answers: serde_json::Value = serde_json::from_str(FULL_ANSWERS)?;
    let response = app
        .patch_json(
            &format!("/api/workflows/{}/answers", wf.id),
            &json!({ "answers": answers }),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // CQS raises a question; the record leaves the plant's hands.
    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &json!({
                "team": "CQS",
                "subject": "Flash point evidence",
                "body": "Please attach the flash point test report.",
            }),
            Some(&cqs),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let query: QueryBody = serde_json::from_slice(&body)?;
    assert_eq!(query.status, "OPEN");
    assert_eq!(query.workflow_state, "CQS_PENDING");

    // Completion is impossible while the review team holds the record.
    let response = app
        .post_json(
            &format!("/api/workflows/{}/complete", wf.id),
            &(),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The plant answers; the workflow falls back to PLANT_PENDING.
    let response = app
        .post_json(
            &format!("/api/queries/{}/responses", query.id),
            &json!({ "body": "Report attached, flash point 11 C." }),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let resolved: QueryBody = serde_json::from_slice(&body)?;
    assert_eq!(resolved.status, "RESOLVED");
    assert_eq!(resolved.workflow_state, "PLANT_PENDING");

    let response = app
        .post_json(
            &format!("/api/workflows/{}/complete", wf.id),
            &(),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let done: WorkflowBody = serde_json::from_slice(&body)?;
    assert_eq!(done.state, "COMPLETED");
    assert_eq!(done.open_queries, 0);

    // Completed records are immutable.
    let response = transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &json!({ "team": "CQS", "subject": "late", "body": "too late" }),
            Some(&cqs),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn completion_requires_all_mandatory_answers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("plant", "pass-plant", &["PLANT"], &["P1"])
        .await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let plant = app.login_token("plant", "pass-plant").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;

    let response = app
        .patch_json(
            &format!("/api/workflows/{}/answers", wf.id),
            &json!({ "answers": { "materialName": "Methanol" } }),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/api/workflows/{}/complete", wf.id),
            &(),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_vec(response.into_body()).await?;
    let envelope: serde_json::Value = serde_json::from_slice(&body)?;
    let message = envelope["message"].as_str().unwrap_or_default();
    assert!(message.contains("casNumber"), "{message}");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn master_data_fills_unanswered_fields_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("plant", "pass-plant", &["PLANT"], &["P1"])
        .await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let plant = app.login_token("plant", "pass-plant").await?;

    app.with_conn(|conn| {
        use diesel::prelude::*;
        diesel::insert_into(matflow::schema::plant_material_data::table)
            .values(&matflow::models::NewPlantMaterialData {
                plant_code: "P1".to_string(),
                material_code: "MAT1".to_string(),
                cas_number: Some("67-56-1".to_string()),
                storage_class: Some("3".to_string()),
                hazard_class: None,
                flash_point: Some("11 C".to_string()),
                un_number: None,
                water_hazard_class: None,
            })
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;

    let response = app
        .patch_json(
            &format!("/api/workflows/{}/answers", wf.id),
            &json!({ "answers": { "materialName": "Methanol", "casNumber": "overridden" } }),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let envelope: serde_json::Value = serde_json::from_slice(&body)?;

    // Explicit answers win; gaps are filled from the plant's master data.
    assert_eq!(envelope["answers"]["casNumber"], "overridden");
    assert_eq!(envelope["answers"]["storageClass"], "3");
    assert_eq!(envelope["answers"]["flashPoint"], "11 C");
    assert!(envelope["answers"].get("unNumber").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn review_states_need_an_open_query() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;

    let response = transition(&app, &jvc, wf.id, "CQS_PENDING").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // COMPLETED never goes through the transition endpoint.
    let response = transition(&app, &jvc, wf.id, "COMPLETED").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn plant_users_only_see_their_own_plants() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("plant1", "pass-plant", &["PLANT"], &["P1"])
        .await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let plant1 = app.login_token("plant1", "pass-plant").await?;

    let mine = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    let foreign = create_workflow(&app, &jvc, "PRJ1", "MAT2", "P2").await?;

    let response = app.get("/api/workflows", Some(&plant1)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let listed: Vec<WorkflowBody> = serde_json::from_slice(&body)?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.id);

    let response = app
        .get(&format!("/api/workflows/{}", foreign.id), Some(&plant1))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Non-plant staff are not scoped.
    let response = app.get("/api/workflows", Some(&jvc)).await?;
    let body = body_to_vec(response.into_body()).await?;
    let listed: Vec<WorkflowBody> = serde_json::from_slice(&body)?;
    assert_eq!(listed.len(), 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn query_team_and_raiser_role_must_match() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("cqs", "pass-cqs-1", &["CQS"], &[]).await?;
    app.insert_user("viewer", "pass-view", &["VIEWER"], &[])
        .await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let cqs = app.login_token("cqs", "pass-cqs-1").await?;
    let viewer = app.login_token("viewer", "pass-view").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;

    let tech_query = json!({ "team": "TECH", "subject": "s", "body": "b" });
    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &tech_query,
            Some(&cqs),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &tech_query,
            Some(&viewer),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Plant users cannot open workflows either.
    app.insert_user("plant", "pass-plant", &["PLANT"], &["P1"])
        .await?;
    let plant = app.login_token("plant", "pass-plant").await?;
    let response = app
        .post_json(
            "/api/workflows",
            &json!({ "project_code": "PRJ9", "material_code": "M9", "plant_code": "P1" }),
            Some(&plant),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn open_queries_pin_the_workflow_to_the_review_team() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("cqs", "pass-cqs-1", &["CQS"], &[]).await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let cqs = app.login_token("cqs", "pass-cqs-1").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;

    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &json!({ "team": "CQS", "subject": "s", "body": "b" }),
            Some(&cqs),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // The record cannot be handed back by a bare transition while the CQS
    // question is still open.
    let response = transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_to_vec(response.into_body()).await?;
    let envelope: serde_json::Value = serde_json::from_slice(&body)?;
    let message = envelope["message"].as_str().unwrap_or_default();
    assert!(message.contains("open CQS"), "{message}");

    let response = app
        .get(&format!("/api/workflows/{}", wf.id), Some(&jvc))
        .await?;
    let body = body_to_vec(response.into_body()).await?;
    let current: WorkflowBody = serde_json::from_slice(&body)?;
    assert_eq!(current.state, "CQS_PENDING");
    assert_eq!(current.open_queries, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn closing_the_last_open_query_returns_record_to_plant() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = match TestApp::spawn().await? {
        Some(app) => app,
        None => return Ok(()),
    };

    app.insert_user("jvc", "pass-jvc-1", &["JVC"], &[]).await?;
    app.insert_user("cqs", "pass-cqs-1", &["CQS"], &[]).await?;
    app.insert_user("tech", "pass-tech", &["TECH"], &[]).await?;
    let jvc = app.login_token("jvc", "pass-jvc-1").await?;
    let cqs = app.login_token("cqs", "pass-cqs-1").await?;
    let tech = app.login_token("tech", "pass-tech").await?;

    let wf = create_workflow(&app, &jvc, "PRJ1", "MAT1", "P1").await?;
    transition(&app, &jvc, wf.id, "PLANT_PENDING").await?;

    // Two open queries, TECH raised last: the workflow waits on TECH.
    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &json!({ "team": "CQS", "subject": "first", "body": "b" }),
            Some(&cqs),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_to_vec(response.into_body()).await?;
    let cqs_query: QueryBody = serde_json::from_slice(&body)?;

    let response = app
        .post_json(
            &format!("/api/workflows/{}/queries", wf.id),
            &json!({ "team": "TECH", "subject": "second", "body": "b" }),
            Some(&tech),
        )
        .await?;
    let body = body_to_vec(response.into_body()).await?;
    let tech_query: QueryBody = serde_json::from_slice(&body)?;
    assert_eq!(tech_query.workflow_state, "TECH_PENDING");

    // A TECH reviewer cannot close a CQS query.
    let response = app
        .post_json(
            &format!("/api/queries/{}/close", cqs_query.id),
            &(),
            Some(&tech),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Closing TECH leaves CQS as the newest open query.
    let response = app
        .post_json(
            &format!("/api/queries/{}/close", tech_query.id),
            &(),
            Some(&tech),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    let closed: QueryBody = serde_json::from_slice(&body)?;
    assert_eq!(closed.status, "CLOSED");
    assert_eq!(closed.workflow_state, "CQS_PENDING");

    let response = app
        .post_json(
            &format!("/api/queries/{}/close", cqs_query.id),
            &(),
            Some(&cqs),
        )
        .await?;
    let body = body_to_vec(response.into_body()).await?;
    let closed: QueryBody = serde_json::from_slice(&body)?;
    assert_eq!(closed.workflow_state, "PLANT_PENDING");

    app.cleanup().await?;
    Ok(())
}
