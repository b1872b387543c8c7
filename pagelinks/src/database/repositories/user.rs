//! User repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::UserDbModel;
use crate::{Error, Result};

/// User repository trait.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user. Fails with [`Error::Conflict`] when the email is taken.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserDbModel>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserDbModel>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<UserDbModel>>;
}

/// SQLx implementation of UserRepository.
pub struct SqlxUserRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxUserRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserDbModel> {
        let now = crate::database::time::now_ms();
        sqlx::query_as::<_, UserDbModel>(
            r#"
            INSERT INTO users (email, password_hash, created_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&self.write_pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict("User already exists")
            } else {
                Error::from(e)
            }
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserDbModel>> {
        let user = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserDbModel>> {
        let user = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}
