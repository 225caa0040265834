use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::{
    repo::UserStore,
    repo_types::{NewUser, StoreError, User},
};

/// In-process `UserStore` with the same constraints as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    last_id: i64,
    rows: BTreeMap<i64, User>,
}

impl Inner {
    fn check_unique(&self, username: &str, email: &str, except_id: Option<i64>) -> Result<(), StoreError> {
        for row in self.rows.values().filter(|u| Some(u.id) != except_id) {
            if row.username == username {
                return Err(StoreError::Duplicate("username".into()));
            }
            if row.email == email {
                return Err(StoreError::Duplicate("email".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_unique(&new.username, &new.email, None)?;
        inner.last_id += 1;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: inner.last_id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            phone: new.phone,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.inner.read().await.rows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn username_taken(&self, username: &str, except_id: Option<i64>) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .any(|u| u.username == username && Some(u.id) != except_id))
    }

    async fn email_taken(&self, email: &str, except_id: Option<i64>) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .values()
            .any(|u| u.email == email && Some(u.id) != except_id))
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_unique(&user.username, &user.email, Some(user.id))?;
        let row = inner.rows.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        row.username = user.username.clone();
        row.email = user.email.clone();
        row.phone = user.phone.clone();
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            phone: String::new(),
        }
    }

    #[tokio::test]
    async fn ids_start_at_one_and_are_not_reused() {
        let store = MemoryUserStore::default();
        let a = store.create(new_user("alice", "a@example.com")).await.unwrap();
        assert_eq!(a.id, 1);
        store.delete(a.id).await.unwrap();
        let b = store.create(new_user("bob", "b@example.com")).await.unwrap();
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn enforces_unique_columns() {
        let store = MemoryUserStore::default();
        store.create(new_user("alice", "a@example.com")).await.unwrap();
        let err = store.create(new_user("alice", "other@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "username"));
        let err = store.create(new_user("carol", "a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(f) if f == "email"));
    }

    #[tokio::test]
    async fn taken_checks_respect_excluded_id() {
        let store = MemoryUserStore::default();
        let a = store.create(new_user("alice", "a@example.com")).await.unwrap();
        assert!(store.username_taken("alice", None).await.unwrap());
        assert!(!store.username_taken("alice", Some(a.id)).await.unwrap());
        assert!(!store.email_taken("A@example.com", None).await.unwrap());
    }
}
