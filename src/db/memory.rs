use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{NewUser, StoreError, User, UserId, UserPatch, UserStore};

#[derive(Default)]
struct Users {
    last_id: i64,
    rows: BTreeMap<i64, User>,
}

impl Users {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.rows
            .iter()
            .any(|(id, u)| Some(*id) != except && u.email == email)
    }
}

/// Process-local store with serial ids. Uniqueness is checked under the write lock,
/// so it behaves like a unique index for concurrent inserts.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Users>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError> {
        let users = self.users.read().await;
        users
            .rows
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<User, StoreError> {
        let id = id.as_serial().ok_or(StoreError::NotFound)?;
        let users = self.users.read().await;
        users.rows.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        users.last_id += 1;
        let id = users.last_id;
        let now = OffsetDateTime::now_utc();
        let stored = User {
            id: UserId::Serial(id),
            name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        users.rows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.read().await.rows.values().cloned().collect())
    }

    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<User, StoreError> {
        let id = id.as_serial().ok_or(StoreError::NotFound)?;
        let mut users = self.users.write().await;
        if !users.rows.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        if let Some(email) = &patch.email {
            if users.email_taken(email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let user = users.rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        patch.apply(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn delete(&self, id: &UserId) -> Result<(), StoreError> {
        let id = id.as_serial().ok_or(StoreError::NotFound)?;
        self.users
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ana".into(),
            email: email.into(),
            avatar_url: String::new(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = MemoryUserStore::new();
        let a = store.insert(new_user("a@example.com")).await.unwrap();
        let b = store.insert(new_user("b@example.com")).await.unwrap();
        assert_eq!(a.id, UserId::Serial(1));
        assert_eq!(b.id, UserId::Serial(2));
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@example.com")).await.unwrap();
        let err = store.insert(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn update_checks_email_against_other_users() {
        let store = MemoryUserStore::new();
        let a = store.insert(new_user("a@example.com")).await.unwrap();
        store.insert(new_user("b@example.com")).await.unwrap();

        let clash = UserPatch {
            email: Some("b@example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(&a.id, clash).await,
            Err(StoreError::DuplicateEmail)
        ));

        // Re-saving its own email is fine.
        let same = UserPatch {
            email: Some("a@example.com".into()),
            name: Some("Ann".into()),
            ..Default::default()
        };
        let updated = store.update(&a.id, same).await.unwrap();
        assert_eq!(updated.name, "Ann");
        assert!(updated.updated_at >= a.updated_at);
    }

    #[tokio::test]
    async fn update_of_missing_user_is_not_found_even_with_taken_email() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@example.com")).await.unwrap();
        let patch = UserPatch {
            email: Some("a@example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(&UserId::Serial(999), patch).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_then_lookup_is_not_found() {
        let store = MemoryUserStore::new();
        let a = store.insert(new_user("a@example.com")).await.unwrap();
        store.delete(&a.id).await.unwrap();
        assert!(matches!(store.find_by_id(&a.id).await, Err(StoreError::NotFound)));
        assert!(matches!(store.delete(&a.id).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.find_by_email("a@example.com").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn object_ids_are_not_found() {
        let store = MemoryUserStore::new();
        let id = UserId::Object("65f0c0ffee0000000000abcd".into());
        assert!(matches!(store.find_by_id(&id).await, Err(StoreError::NotFound)));
    }
}
