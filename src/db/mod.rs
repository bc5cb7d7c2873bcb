//! Database module: directive models, SQL text and engine sessions.
//!
//! Layout:
//! - `models.rs`: identifiers, the database/extension specs and catalog rows
//! - `schema.rs`: DDL rendering and catalog queries (PostgreSQL)
//! - `postgres.rs`: admin and target-database sessions over sqlx

pub mod models;
pub mod postgres;
pub mod schema;

pub use models::{ConnectionLimit, DatabaseInfo, DatabaseSpec, ExtensionInfo, ExtensionSpec, Identifier};
pub use postgres::{AdminSession, DatabaseSession};
