use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::access::plant::PlantScoped;
use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub enabled: bool,
    pub status: String,
    pub primary_plant: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub primary_plant: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = roles)]
#[diesel(primary_key(name))]
pub struct Role {
    pub name: String,
    pub category: String,
    pub rank: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = roles)]
pub struct NewRole {
    pub name: String,
    pub category: String,
    pub rank: i32,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = user_roles)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Role, foreign_key = role_name))]
#[diesel(primary_key(user_id, role_name))]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_name: String,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_roles)]
pub struct NewUserRole {
    pub user_id: Uuid,
    pub role_name: String,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = user_plants)]
#[diesel(belongs_to(User))]
#[diesel(primary_key(user_id, plant_code))]
pub struct UserPlant {
    pub user_id: Uuid,
    pub plant_code: String,
    pub position: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_plants)]
pub struct NewUserPlant {
    pub user_id: Uuid,
    pub plant_code: String,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User))]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = workflows)]
pub struct Workflow {
    pub id: Uuid,
    pub project_code: String,
    pub material_code: String,
    pub plant_code: String,
    pub state: String,
    pub answers: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = workflows)]
pub struct NewWorkflow {
    pub id: Uuid,
    pub project_code: String,
    pub material_code: String,
    pub plant_code: String,
    pub state: String,
    pub answers: serde_json::Value,
    pub created_by: Uuid,
}

impl PlantScoped for Workflow {
    fn plant_code(&self) -> Option<&str> {
        Some(&self.plant_code)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = queries)]
#[diesel(belongs_to(Workflow))]
pub struct Query {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub team: String,
    pub status: String,
    pub subject: String,
    pub body: String,
    pub raised_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = queries)]
pub struct NewQuery {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub team: String,
    pub status: String,
    pub subject: String,
    pub body: String,
    pub raised_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = responses)]
#[diesel(belongs_to(Query))]
pub struct QueryResponse {
    pub id: Uuid,
    pub query_id: Uuid,
    pub body: String,
    pub responder_id: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = responses)]
pub struct NewQueryResponse {
    pub id: Uuid,
    pub query_id: Uuid,
    pub body: String,
    pub responder_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub response_id: Option<Uuid>,
    pub project_code: String,
    pub material_code: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub size_bytes: i64,
    pub source: String,
    pub is_reused: bool,
    pub uploaded_by: Uuid,
    pub uploaded_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub query_id: Option<Uuid>,
    pub response_id: Option<Uuid>,
    pub project_code: String,
    pub material_code: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub storage_key: String,
    pub size_bytes: i64,
    pub source: String,
    pub is_reused: bool,
    pub uploaded_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = access_logs)]
pub struct AccessLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub ip: Option<String>,
    pub outcome: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = access_logs)]
pub struct NewAccessLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub ip: Option<String>,
    pub outcome: String,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = plant_material_data)]
pub struct PlantMaterialData {
    pub plant_code: String,
    pub material_code: String,
    pub cas_number: Option<String>,
    pub storage_class: Option<String>,
    pub hazard_class: Option<String>,
    pub flash_point: Option<String>,
    pub un_number: Option<String>,
    pub water_hazard_class: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = plant_material_data)]
pub struct NewPlantMaterialData {
    pub plant_code: String,
    pub material_code: String,
    pub cas_number: Option<String>,
    pub storage_class: Option<String>,
    pub hazard_class: Option<String>,
    pub flash_point: Option<String>,
    pub un_number: Option<String>,
    pub water_hazard_class: Option<String>,
}
