//! End-to-end scenarios over a real TCP server: a seeded in-memory store,
//! the full dispatch table, and the pooled RPC client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use gatehouse_backend::handlers::build_dispatcher;
use gatehouse_backend::store::{MemoryStore, UserStore};
use gatehouse_session::{Client, Server};
use gatehouse_token::TokenIssuer;
use gatehouse_wire::UserView;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &[u8] = b"service-flow-secret";

async fn spawn_backend() -> (SocketAddr, Arc<MemoryStore>, Arc<TokenIssuer>) {
    let store = Arc::new(MemoryStore::new());
    store.seed_login("alice", "secret", "A", "/a.png");
    let tokens = Arc::new(TokenIssuer::new(SECRET, Duration::from_secs(600)));
    let dispatcher = build_dispatcher(store.clone(), tokens.clone()).unwrap();
    let server = Server::bind("127.0.0.1", 0, dispatcher, TIMEOUT)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, store, tokens)
}

fn client(addr: SocketAddr) -> Client {
    Client::new("127.0.0.1", addr.port(), 4, TIMEOUT)
}

/// Sign claims with the backend secret, bypassing the issuer. Used to craft
/// an already-expired token without sleeping across an exp boundary.
fn sign_expired(subject: &str) -> String {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        iat: u64,
        exp: u64,
    }
    let now = jsonwebtoken::get_current_timestamp();
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &Claims {
            sub: subject.to_string(),
            iat: now - 120,
            exp: now - 60,
        },
        &jsonwebtoken::EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

#[tokio::test]
async fn login_success_returns_a_token() {
    let (addr, _store, tokens) = spawn_backend().await;
    let token = client(addr).login("alice", "secret").await.unwrap();
    assert!(!token.is_empty());
    assert_eq!(
        tokens.validate(&token).unwrap(),
        gatehouse_token::TokenStatus::Valid {
            subject: "alice".to_string()
        }
    );
}

#[tokio::test]
async fn login_with_bad_password_is_an_auth_failure() {
    let (addr, _store, _tokens) = spawn_backend().await;
    let err = client(addr).login("alice", "wrong").await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn get_user_info_with_a_valid_token() {
    let (addr, _store, _tokens) = spawn_backend().await;
    let client = client(addr);
    let token = client.login("alice", "secret").await.unwrap();
    let user = client.get_user_info(&token).await.unwrap();
    assert_eq!(user.id, "alice");
    assert_eq!(user.nickname, "A");
    assert_eq!(user.pic_path, "/a.png");
    assert!(user.password.is_empty());
}

#[tokio::test]
async fn get_user_info_with_an_expired_token_is_an_auth_failure() {
    let (addr, _store, _tokens) = spawn_backend().await;
    let err = client(addr)
        .get_user_info(&sign_expired("alice"))
        .await
        .unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn authenticate_distinguishes_live_and_expired_tokens() {
    let (addr, _store, _tokens) = spawn_backend().await;
    let client = client(addr);
    let token = client.login("alice", "secret").await.unwrap();
    assert!(client.authenticate(&token).await.unwrap());
    assert!(!client.authenticate(&sign_expired("alice")).await.unwrap());
    assert!(!client.authenticate("garbage").await.unwrap());
}

#[tokio::test]
async fn edit_then_get_observes_the_new_record() {
    let (addr, store, _tokens) = spawn_backend().await;
    let client = client(addr);
    let token = client.login("alice", "secret").await.unwrap();

    client
        .edit_user_info(
            &token,
            UserView {
                nickname: "Alice".to_string(),
                ..UserView::default()
            },
        )
        .await
        .unwrap();

    let user = client.get_user_info(&token).await.unwrap();
    assert_eq!(user.nickname, "Alice");
    // Fields left empty in the edit are untouched.
    assert_eq!(user.pic_path, "/a.png");

    // The store saw the same thing the wire reports.
    let record = store.fetch("alice").await.unwrap().unwrap();
    assert_eq!(record.nickname, "Alice");
}

#[tokio::test]
async fn password_edit_allows_login_with_the_new_password() {
    let (addr, _store, _tokens) = spawn_backend().await;
    let client = client(addr);
    let token = client.login("alice", "secret").await.unwrap();

    client
        .edit_user_info(
            &token,
            UserView {
                password: "hunter2".to_string(),
                ..UserView::default()
            },
        )
        .await
        .unwrap();

    assert!(client.login("alice", "secret").await.unwrap_err().is_auth());
    let token = client.login("alice", "hunter2").await.unwrap();
    assert!(!token.is_empty());
}

#[tokio::test]
async fn unknown_tag_closes_the_connection_but_not_the_server() {
    let (addr, _store, _tokens) = spawn_backend().await;

    let mut socket = TcpStream::connect(addr).await.unwrap();
    // Tag 255 (varint FF 01) with an empty payload.
    socket.write_all(&[0xFF, 0x01, 0x00]).await.unwrap();
    let mut buf = [0u8; 1];
    let n = socket.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server should close the offending connection");

    // Unrelated connections keep working.
    client(addr).health_check().await.unwrap();
}
