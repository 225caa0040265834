use async_trait::async_trait;
use sqlx::PgPool;

use crate::users::repo_types::{NewUser, StoreError, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, phone, created_at, updated_at";

/// Persistence boundary for the `users` table.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<User, StoreError>;
    async fn find_all(&self) -> Result<Vec<User>, StoreError>;
    /// Exact match, optionally ignoring the row with `except_id`.
    async fn username_taken(&self, username: &str, except_id: Option<i64>) -> Result<bool, StoreError>;
    async fn email_taken(&self, email: &str, except_id: Option<i64>) -> Result<bool, StoreError>;
    /// Replaces the mutable columns of an existing row.
    async fn update(&self, user: &User) -> Result<User, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
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

/// Maps unique violations on the users table to `Duplicate`.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some(c) if c.contains("email") => "email",
                Some(c) if c.contains("username") => "username",
                _ => "unique field",
            };
            return StoreError::Duplicate(field.to_string());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.phone)
        .fetch_one(&self.db)
        .await
        .map_err(map_write_error)?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"))
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn username_taken(&self, username: &str, except_id: Option<i64>) -> Result<bool, StoreError> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                 WHERE username = $1
                   AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(username)
        .bind(except_id)
        .fetch_one(&self.db)
        .await?;
        Ok(taken)
    }

    async fn email_taken(&self, email: &str, except_id: Option<i64>) -> Result<bool, StoreError> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                 WHERE email = $1
                   AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(email)
        .bind(except_id)
        .fetch_one(&self.db)
        .await?;
        Ok(taken)
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET username = $2, email = $3, phone = $4, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone)
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_error)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod pg_tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "$argon2id$stub".into(),
            phone: String::new(),
        }
    }

    #[sqlx::test]
    async fn unique_violations_name_the_field(pool: PgPool) {
        let store = PgUserStore::new(pool);
        store.create(new_user("alice", "alice@example.com")).await.unwrap();

        let err = store.create(new_user("alice", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "username"));

        let err = store.create(new_user("bob", "alice@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "email"));
    }

    #[sqlx::test]
    async fn taken_queries_honor_excluded_id(pool: PgPool) {
        let store = PgUserStore::new(pool);
        let alice = store.create(new_user("alice", "alice@example.com")).await.unwrap();

        assert!(store.username_taken("alice", None).await.unwrap());
        assert!(!store.username_taken("alice", Some(alice.id)).await.unwrap());
        assert!(!store.username_taken("Alice", None).await.unwrap());
        assert!(store.email_taken("alice@example.com", None).await.unwrap());
        assert!(!store.email_taken("alice@example.com", Some(alice.id)).await.unwrap());
    }

    #[sqlx::test]
    async fn update_and_delete_report_missing_rows(pool: PgPool) {
        let store = PgUserStore::new(pool);
        let mut alice = store.create(new_user("alice", "alice@example.com")).await.unwrap();
        let bob = store.create(new_user("bob", "bob@example.com")).await.unwrap();

        alice.phone = "555-0100".into();
        let updated = store.update(&alice).await.unwrap();
        assert_eq!(updated.phone, "555-0100");
        assert!(updated.updated_at >= alice.created_at);

        alice.email = bob.email.clone();
        let err = store.update(&alice).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "email"));

        store.delete(bob.id).await.unwrap();
        assert!(matches!(store.delete(bob.id).await, Err(StoreError::NotFound)));
        assert!(matches!(store.find_by_id(bob.id).await, Err(StoreError::NotFound)));

        let mut ghost = updated.clone();
        ghost.id = bob.id;
        ghost.username = "ghost".into();
        ghost.email = "ghost@example.com".into();
        assert!(matches!(store.update(&ghost).await, Err(StoreError::NotFound)));

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        store.ping().await.unwrap();
    }
}
