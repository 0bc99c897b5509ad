pub mod access;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod docpolicy;
pub mod error;
pub mod models;
pub mod plant_material;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod workflow;
