//! Portal behavior against a real in-process backend: cache read-through,
//! the authenticate-on-hit check, and invalidation on edit.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_backend::handlers::build_dispatcher;
use gatehouse_backend::store::{MemoryStore, UserStore};
use gatehouse_session::{Client, Server};
use gatehouse_token::TokenIssuer;
use gatehouse_web::cache::{MemoryCache, UserCache};
use gatehouse_web::service::{Portal, PortalError};
use gatehouse_wire::UserView;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    portal: Portal,
    cache: Arc<MemoryCache>,
    store: Arc<MemoryStore>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.seed_login("alice", "secret", "A", "/a.png");
    let tokens = Arc::new(TokenIssuer::new(b"portal-tests", Duration::from_secs(600)));
    let dispatcher = build_dispatcher(store.clone(), tokens).unwrap();
    let server = Server::bind("127.0.0.1", 0, dispatcher, TIMEOUT)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let client = Client::new("127.0.0.1", addr.port(), 4, TIMEOUT);
    let cache = Arc::new(MemoryCache::new());
    Fixture {
        portal: Portal::new(client, cache.clone() as Arc<dyn UserCache>),
        cache,
        store,
    }
}

#[tokio::test]
async fn miss_fetches_from_backend_and_populates_the_cache() {
    let fx = fixture().await;
    let token = fx.portal.login("alice", "secret").await.unwrap();

    assert!(fx.cache.get("alice").await.unwrap().is_none());
    let user = fx.portal.current_user(&token).await.unwrap();
    assert_eq!(user.nickname, "A");

    let cached = fx.cache.get("alice").await.unwrap().unwrap();
    assert_eq!(cached.nickname, "A");
    assert_eq!(cached.pic_path, "/a.png");
}

#[tokio::test]
async fn hit_serves_the_cached_projection() {
    let fx = fixture().await;
    let token = fx.portal.login("alice", "secret").await.unwrap();

    // Make the cache disagree with the store; a served hit proves the
    // projection came from the cache.
    fx.cache
        .put(&UserView {
            id: "alice".to_string(),
            password: String::new(),
            nickname: "Cached".to_string(),
            pic_path: "/cached.png".to_string(),
        })
        .await
        .unwrap();

    let user = fx.portal.current_user(&token).await.unwrap();
    assert_eq!(user.nickname, "Cached");
    assert_eq!(user.pic_path, "/cached.png");
}

#[tokio::test]
async fn hit_still_rejects_a_token_the_backend_refuses() {
    let fx = fixture().await;
    let token = fx.portal.login("alice", "secret").await.unwrap();
    fx.portal.current_user(&token).await.unwrap();
    assert!(fx.cache.get("alice").await.unwrap().is_some());

    // Same subject, different signing key: the cache has the entry, but
    // the authenticate RPC on the hit path must still veto it.
    let forged = TokenIssuer::new(b"not-the-backend-key", Duration::from_secs(600)).issue("alice");
    let err = fx.portal.current_user(&forged).await.unwrap_err();
    assert!(matches!(err, PortalError::Forbidden));
}

#[tokio::test]
async fn edit_invalidates_then_the_next_read_repopulates() {
    let fx = fixture().await;
    let token = fx.portal.login("alice", "secret").await.unwrap();

    fx.portal.current_user(&token).await.unwrap();
    assert!(fx.cache.get("alice").await.unwrap().is_some());

    fx.portal.edit_user(&token, "Alice", "", "").await.unwrap();

    // The projection is gone immediately after the edit.
    assert!(fx.cache.get("alice").await.unwrap().is_none());

    // The next read observes the new record and repopulates the cache.
    let user = fx.portal.current_user(&token).await.unwrap();
    assert_eq!(user.nickname, "Alice");
    assert_eq!(user.pic_path, "/a.png");
    let cached = fx.cache.get("alice").await.unwrap().unwrap();
    assert_eq!(cached.nickname, "Alice");

    // The store agrees.
    let record = fx.store.fetch("alice").await.unwrap().unwrap();
    assert_eq!(record.nickname, "Alice");
}

#[tokio::test]
async fn bad_credentials_are_forbidden() {
    let fx = fixture().await;
    let err = fx.portal.login("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, PortalError::Forbidden));
}

#[tokio::test]
async fn garbage_token_is_forbidden_without_an_rpc() {
    let fx = fixture().await;
    let err = fx.portal.current_user("garbage").await.unwrap_err();
    assert!(matches!(err, PortalError::Forbidden));
}
