use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Prefix mixed into every password before digesting. Part of the stored
/// data format: changing it invalidates every existing password hash.
const PASSWORD_SALT: &str = "salt#";

/// Digest a plaintext password into its stored hex form.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", PASSWORD_SALT, password)))
}

/// The authoritative user state, as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub password_hash: String,
    pub nickname: String,
    pub pic_path: String,
}

/// A field-selective update. `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub id: String,
    pub password_hash: Option<String>,
    pub nickname: Option<String>,
    pub pic_path: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none() && self.nickname.is_none() && self.pic_path.is_none()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Lookup-by-id and field-update over the persistent user store.
///
/// The backend does not care which engine sits behind this; handlers only
/// need these two operations.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn update(&self, patch: &UserPatch) -> Result<(), StoreError>;
}

/// Postgres-backed store. All statements are parameterized; user-supplied
/// values never reach the SQL text.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<PgUserStore, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(PgUserStore { pool })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn fetch(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, password, nickname, pic_path FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| UserRecord {
            id: row.get("id"),
            password_hash: row.get("password"),
            nickname: row.get("nickname"),
            pic_path: row.get("pic_path"),
        }))
    }

    async fn update(&self, patch: &UserPatch) -> Result<(), StoreError> {
        let mut assignments = Vec::new();
        let mut position = 1;
        if patch.password_hash.is_some() {
            assignments.push(format!("password = ${}", position));
            position += 1;
        }
        if patch.nickname.is_some() {
            assignments.push(format!("nickname = ${}", position));
            position += 1;
        }
        if patch.pic_path.is_some() {
            assignments.push(format!("pic_path = ${}", position));
            position += 1;
        }
        if assignments.is_empty() {
            return Ok(());
        }

        let statement = format!(
            "UPDATE users SET {} WHERE id = ${}",
            assignments.join(", "),
            position
        );
        let mut query = sqlx::query(&statement);
        if let Some(hash) = &patch.password_hash {
            query = query.bind(hash);
        }
        if let Some(nickname) = &patch.nickname {
            query = query.bind(nickname);
        }
        if let Some(pic_path) = &patch.pic_path {
            query = query.bind(pic_path);
        }
        query.bind(&patch.id).execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory store for tests and the `--seed-demo` development mode.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn seed(&self, record: UserRecord) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.insert(record.id.clone(), record);
    }

    /// Seed a user from a plaintext password, digesting it the way the
    /// production data pipeline does.
    pub fn seed_login(&self, id: &str, password: &str, nickname: &str, pic_path: &str) {
        self.seed(UserRecord {
            id: id.to_string(),
            password_hash: password_digest(password),
            nickname: nickname.to_string(),
            pic_path: pic_path.to_string(),
        });
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn fetch(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        Ok(users.get(id).cloned())
    }

    async fn update(&self, patch: &UserPatch) -> Result<(), StoreError> {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = users.get_mut(&patch.id) {
            if let Some(hash) = &patch.password_hash {
                record.password_hash = hash.clone();
            }
            if let Some(nickname) = &patch.nickname {
                record.nickname = nickname.clone();
            }
            if let Some(pic_path) = &patch.pic_path {
                record.pic_path = pic_path.clone();
            }
        }
        Ok(())
    }
}
