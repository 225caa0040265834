use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::users::{
    dto::{CreateUserRequest, UpdateUserRequest, UserResponse},
    password::hash_password,
    repo::UserStore,
    repo_types::{NewUser, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("user {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Hashing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UserError {
    /// Resolves store outcomes that carry business meaning for a given id.
    fn from_store(id: i64, e: StoreError) -> Self {
        match e {
            StoreError::NotFound => UserError::NotFound(id),
            StoreError::Duplicate(field) => UserError::Conflict(format!("{field} is already taken")),
            other => UserError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserResponse>, UserError> {
        let users = self.store.find_all().await?;
        debug!(count = users.len(), "users listed");
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: i64) -> Result<UserResponse, UserError> {
        let user = self
            .store
            .find_by_id(id)
            .await
            .map_err(|e| UserError::from_store(id, e))?;
        Ok(user.into())
    }

    #[instrument(skip(self, req))]
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<UserResponse, UserError> {
        let req = req.normalize().map_err(UserError::Validation)?;

        if self.store.username_taken(&req.username, None).await? {
            warn!(username = %req.username, "username already registered");
            return Err(UserError::Conflict("username is already taken".into()));
        }
        if self.store.email_taken(&req.email, None).await? {
            warn!(email = %req.email, "email already registered");
            return Err(UserError::Conflict("email is already taken".into()));
        }

        let password = req.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| {
                error!(error = %e, "password hashing task failed");
                UserError::Hashing(e.to_string())
            })?
            .map_err(|e| UserError::Hashing(e.to_string()))?;

        let user = self
            .store
            .create(NewUser {
                username: req.username,
                email: req.email,
                password_hash,
                phone: req.phone.unwrap_or_default(),
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(field) => UserError::Conflict(format!("{field} is already taken")),
                other => UserError::Store(other),
            })?;

        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user.into())
    }

    #[instrument(skip(self, req))]
    pub async fn update_user(&self, id: i64, req: UpdateUserRequest) -> Result<UserResponse, UserError> {
        let req = req.normalize().map_err(UserError::Validation)?;

        let mut user = self
            .store
            .find_by_id(id)
            .await
            .map_err(|e| UserError::from_store(id, e))?;

        if let Some(username) = req.username.filter(|u| *u != user.username) {
            if self.store.username_taken(&username, Some(id)).await? {
                warn!(user_id = id, username = %username, "username already registered");
                return Err(UserError::Conflict("username is already taken".into()));
            }
            user.username = username;
        }
        if let Some(email) = req.email.filter(|e| *e != user.email) {
            if self.store.email_taken(&email, Some(id)).await? {
                warn!(user_id = id, email = %email, "email already registered");
                return Err(UserError::Conflict("email is already taken".into()));
            }
            user.email = email;
        }
        if let Some(phone) = req.phone {
            user.phone = phone;
        }

        let user = self
            .store
            .update(&user)
            .await
            .map_err(|e| UserError::from_store(id, e))?;
        info!(user_id = id, "user updated");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: i64) -> Result<i64, UserError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(|e| UserError::from_store(id, e))?;
        self.store
            .delete(id)
            .await
            .map_err(|e| UserError::from_store(id, e))?;
        info!(user_id = id, "user deleted");
        Ok(id)
    }
}
