use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use gatehouse_wire::UserView;

/// The cached projection of a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUser {
    pub nickname: String,
    pub pic_path: String,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Read-through cache of user projections, keyed by user id.
///
/// The frontend populates entries on a get-user miss and deletes them after
/// every successful edit; the backend never touches the cache.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<CachedUser>, CacheError>;
    async fn put(&self, user: &UserView) -> Result<(), CacheError>;
    async fn delete(&self, id: &str) -> Result<(), CacheError>;
}

/// Redis-backed cache: one hash per user id with `nickname` and `pic_path`
/// fields.
pub struct RedisUserCache {
    conn: ConnectionManager,
}

impl RedisUserCache {
    pub async fn connect(host: &str, port: u16) -> Result<RedisUserCache, CacheError> {
        let client = redis::Client::open(format!("redis://{}:{}/", host, port))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisUserCache { conn })
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get(&self, id: &str) -> Result<Option<CachedUser>, CacheError> {
        let mut conn = self.conn.clone();
        let fields: Vec<Option<String>> = conn.hget(id, &["nickname", "pic_path"][..]).await?;
        let mut fields = fields.into_iter();
        let nickname = fields.next().flatten();
        let pic_path = fields.next().flatten();
        // A missing nickname field means the key is absent.
        Ok(nickname.map(|nickname| CachedUser {
            nickname,
            pic_path: pic_path.unwrap_or_default(),
        }))
    }

    async fn put(&self, user: &UserView) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset_multiple(
                &user.id,
                &[
                    ("nickname", user.nickname.as_str()),
                    ("pic_path", user.pic_path.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(id).await?;
        Ok(())
    }
}

/// In-memory cache for tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CachedUser>>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }
}

#[async_trait]
impl UserCache for MemoryCache {
    async fn get(&self, id: &str) -> Result<Option<CachedUser>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(id).cloned())
    }

    async fn put(&self, user: &UserView) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            user.id.clone(),
            CachedUser {
                nickname: user.nickname.clone(),
                pic_path: user.pic_path.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: &str, nickname: &str, pic_path: &str) -> UserView {
        UserView {
            id: id.to_string(),
            password: String::new(),
            nickname: nickname.to_string(),
            pic_path: pic_path.to_string(),
        }
    }

    #[tokio::test]
    async fn memory_cache_put_get_delete() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("alice").await.unwrap(), None);

        cache.put(&view("alice", "A", "/a.png")).await.unwrap();
        assert_eq!(
            cache.get("alice").await.unwrap(),
            Some(CachedUser {
                nickname: "A".to_string(),
                pic_path: "/a.png".to_string(),
            })
        );

        cache.delete("alice").await.unwrap();
        assert_eq!(cache.get("alice").await.unwrap(), None);
        // Deleting an absent key is fine.
        cache.delete("alice").await.unwrap();
    }

    #[tokio::test]
    async fn put_overwrites_the_projection() {
        let cache = MemoryCache::new();
        cache.put(&view("alice", "A", "/a.png")).await.unwrap();
        cache.put(&view("alice", "Alice", "/b.png")).await.unwrap();
        assert_eq!(
            cache.get("alice").await.unwrap().unwrap().nickname,
            "Alice"
        );
    }
}
