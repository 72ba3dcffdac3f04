use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfilePatch, PublicUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Credential store. Implementations own email uniqueness: `create` and
/// `update_profile` must fail with `EmailTaken` atomically, not after a
/// separate read.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Full record including the password hash, for login and uniqueness checks.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Projection without the password hash.
    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError>;
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        patch: ProfilePatch,
    ) -> Result<Option<PublicUser>, StoreError>;
    async fn set_avatar(&self, id: Uuid, avatar: &str) -> Result<Option<PublicUser>, StoreError>;
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::EmailTaken,
        _ => StoreError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, password_hash, avatar
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        let user = sqlx::query_as::<_, PublicUser>(
            r#"
            SELECT id, name, email, avatar
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, avatar
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        patch: ProfilePatch,
    ) -> Result<Option<PublicUser>, StoreError> {
        sqlx::query_as::<_, PublicUser>(
            r#"
            UPDATE users
               SET name = COALESCE($2, name),
                   email = COALESCE($3, email)
             WHERE id = $1
            RETURNING id, name, email, avatar
            "#,
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique)
    }

    async fn set_avatar(&self, id: Uuid, avatar: &str) -> Result<Option<PublicUser>, StoreError> {
        let user = sqlx::query_as::<_, PublicUser>(
            r#"
            UPDATE users
               SET avatar = $2
             WHERE id = $1
            RETURNING id, name, email, avatar
            "#,
        )
        .bind(id)
        .bind(avatar)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}
