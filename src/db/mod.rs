use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreConfig, StoreKind};

pub mod memory;
pub mod mongo;
pub mod postgres;
mod types;

pub use types::{NewUser, User, UserId, UserPatch};

/// Store failures, already classified so callers never inspect driver errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("email already in use")]
    DuplicateEmail,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for the user entity. Every backend enforces email uniqueness itself.
#[async_trait]
pub trait UserStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: &UserId) -> Result<User, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    async fn list_all(&self) -> Result<Vec<User>, StoreError>;
    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<User, StoreError>;
    async fn delete(&self, id: &UserId) -> Result<(), StoreError>;

    /// Releases pooled connections. Called once at shutdown.
    async fn close(&self);
}

pub async fn connect(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn UserStore>> {
    let store: Arc<dyn UserStore> = match cfg.kind {
        StoreKind::Postgres => Arc::new(postgres::PgUserStore::connect(cfg).await?),
        StoreKind::Mongo => Arc::new(mongo::MongoUserStore::connect(cfg).await?),
        StoreKind::Memory => Arc::new(memory::MemoryUserStore::new()),
    };
    tracing::info!(backend = store.backend(), "user store ready");
    Ok(store)
}
