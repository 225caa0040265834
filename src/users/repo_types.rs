use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub phone: String,         // empty when not provided
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert payload; id and timestamps come from the database.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("duplicate value for {0}")]
    Duplicate(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
