use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{NewUser, StoreError, User, UserId, UserPatch, UserStore};
use crate::config::StoreConfig;

const USERS_COLLECTION: &str = "users";
const EMAIL_INDEX: &str = "uniq_email";
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
    email: String,
    #[serde(rename = "avatarUrl", default)]
    avatar_url: String,
    #[serde(rename = "passwordHash")]
    password_hash: String,
    #[serde(rename = "createdAt")]
    created_at: BsonDateTime,
    #[serde(rename = "updatedAt")]
    updated_at: BsonDateTime,
}

fn to_offset(dt: BsonDateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(dt.timestamp_millis()) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl From<UserDocument> for User {
    fn from(d: UserDocument) -> Self {
        User {
            id: UserId::Object(d.id.to_hex()),
            name: d.name,
            email: d.email,
            avatar_url: d.avatar_url,
            password_hash: d.password_hash,
            created_at: to_offset(d.created_at),
            updated_at: to_offset(d.updated_at),
        }
    }
}

fn object_id(id: &UserId) -> Option<ObjectId> {
    id.as_object().and_then(|hex| ObjectId::parse_str(hex).ok())
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn classify(err: MongoError) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::DuplicateEmail
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

/// `$set` document for a patch; `updatedAt` is always bumped.
fn set_document(patch: &UserPatch, now: BsonDateTime) -> Document {
    let mut set = doc! { "updatedAt": now };
    if let Some(name) = &patch.name {
        set.insert("name", name.as_str());
    }
    if let Some(email) = &patch.email {
        set.insert("email", email.as_str());
    }
    if let Some(avatar_url) = &patch.avatar_url {
        set.insert("avatarUrl", avatar_url.as_str());
    }
    doc! { "$set": set }
}

/// Users collection in MongoDB; ids are generated `ObjectId`s.
#[derive(Clone)]
pub struct MongoUserStore {
    client: Client,
    users: Collection<UserDocument>,
}

impl MongoUserStore {
    pub async fn connect(cfg: &StoreConfig) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(&cfg.url)
            .await
            .context("parse mongo connection string")?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.max_pool_size = Some(cfg.max_connections);
        options.max_idle_time = Some(Duration::from_secs(300));
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options).context("build mongo client")?;
        let db = client.database(&cfg.mongo_db);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .context("ping mongo")?;

        let store = Self {
            users: db.collection::<UserDocument>(USERS_COLLECTION),
            client,
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Idempotent: creating an index that already exists with the same spec is a no-op.
    async fn ensure_indexes(&self) -> anyhow::Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name(EMAIL_INDEX.to_string())
                    .build(),
            )
            .build();
        self.users
            .create_index(index, None)
            .await
            .context("create unique email index")?;
        info!(index = EMAIL_INDEX, "mongo indexes ensured");
        Ok(())
    }

    async fn find_one(&self, filter: Document) -> Result<User, StoreError> {
        self.users
            .find_one(filter, None)
            .await
            .map_err(classify)?
            .map(User::from)
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn find_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.find_one(doc! { "email": email }).await
    }

    async fn find_by_id(&self, id: &UserId) -> Result<User, StoreError> {
        let oid = object_id(id).ok_or(StoreError::NotFound)?;
        self.find_one(doc! { "_id": oid }).await
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let now = BsonDateTime::now();
        let document = UserDocument {
            id: ObjectId::new(),
            name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        self.users
            .insert_one(&document, None)
            .await
            .map_err(classify)?;
        debug!(user_id = %document.id, "user document inserted");
        Ok(document.into())
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self
            .users
            .find(doc! {}, options)
            .await
            .map_err(classify)?;
        let documents: Vec<UserDocument> = cursor.try_collect().await.map_err(classify)?;
        Ok(documents.into_iter().map(User::from).collect())
    }

    async fn update(&self, id: &UserId, patch: UserPatch) -> Result<User, StoreError> {
        let oid = object_id(id).ok_or(StoreError::NotFound)?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.users
            .find_one_and_update(
                doc! { "_id": oid },
                set_document(&patch, BsonDateTime::now()),
                options,
            )
            .await
            .map_err(classify)?
            .map(User::from)
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: &UserId) -> Result<(), StoreError> {
        let oid = object_id(id).ok_or(StoreError::NotFound)?;
        let result = self
            .users
            .delete_one(doc! { "_id": oid }, None)
            .await
            .map_err(classify)?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_maps_to_object_user() {
        let oid = ObjectId::new();
        let created = BsonDateTime::from_millis(1_700_000_000_123);
        let user = User::from(UserDocument {
            id: oid,
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar_url: String::new(),
            password_hash: "hash".into(),
            created_at: created,
            updated_at: created,
        });
        assert_eq!(user.id, UserId::Object(oid.to_hex()));
        assert_eq!(
            user.created_at.unix_timestamp_nanos(),
            1_700_000_000_123_000_000
        );
    }

    #[test]
    fn object_id_rejects_serial_ids() {
        assert!(object_id(&UserId::Serial(3)).is_none());
        let oid = ObjectId::new();
        assert_eq!(object_id(&UserId::Object(oid.to_hex())), Some(oid));
    }

    #[test]
    fn set_document_contains_only_patched_fields() {
        let now = BsonDateTime::from_millis(0);
        let patch = UserPatch {
            email: Some("new@example.com".into()),
            ..Default::default()
        };
        let update = set_document(&patch, now);
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("email").unwrap(), "new@example.com");
        assert!(set.get("name").is_none());
        assert!(set.get("avatarUrl").is_none());
        assert_eq!(set.get_datetime("updatedAt").unwrap(), &now);
    }

    #[test]
    fn stored_document_uses_camel_case_keys() {
        let document = UserDocument {
            id: ObjectId::new(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            avatar_url: "https://a/1.png".into(),
            password_hash: "hash".into(),
            created_at: BsonDateTime::now(),
            updated_at: BsonDateTime::now(),
        };
        let raw = mongodb::bson::to_document(&document).unwrap();
        assert!(raw.contains_key("_id"));
        assert!(raw.contains_key("avatarUrl"));
        assert!(raw.contains_key("passwordHash"));
    }
}
