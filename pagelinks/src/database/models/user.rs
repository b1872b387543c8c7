//! User database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User database model.
#[derive(Debug, Clone, FromRow)]
pub struct UserDbModel {
    pub id: i64,
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

/// A user as exposed outside the persistence layer (no password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&UserDbModel> for UserInfo {
    fn from(user: &UserDbModel) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            created_at: crate::database::time::ms_to_datetime(user.created_at),
        }
    }
}
