use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use gatehouse_wire::{Message, MsgTag};

use crate::stream::{MsgStream, StreamError};

/// A request handler for one message tag.
///
/// Handlers receive the decoded request and return exactly one response
/// message; internal failures are mapped onto wire response codes inside
/// the handler and never propagate to the connection worker.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The request tag this handler services.
    fn tag(&self) -> MsgTag;

    /// Handle one request. `peer` is the remote address, for logging.
    async fn handle(&self, request: Message, peer: &str) -> Message;
}

/// Tag-to-handler table, populated once at startup.
pub struct Dispatcher {
    handlers: HashMap<MsgTag, Arc<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its tag.
    ///
    /// Re-registering a tag is a configuration error.
    pub fn register(&mut self, handler: impl Handler + 'static) -> Result<(), DispatchError> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) -> Result<(), DispatchError> {
        let tag = handler.tag();
        if self.handlers.contains_key(&tag) {
            return Err(DispatchError::AlreadyRegistered(tag));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    pub fn lookup(&self, tag: MsgTag) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&tag)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while populating the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// A handler is already registered for this tag.
    AlreadyRegistered(MsgTag),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::AlreadyRegistered(tag) => {
                write!(f, "handler already registered for {}", tag)
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// The backend dispatch server.
///
/// Accepts connections on one listening endpoint and serves each from its
/// own task, so a slow request never blocks unrelated connections. Within
/// one connection requests are strictly serial: read, dispatch, respond,
/// repeat, until the peer closes or stays silent past the idle deadline.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    read_timeout: Duration,
}

impl Server {
    /// Bind the listening endpoint. Failure here is fatal to the process;
    /// the caller decides how loudly.
    pub async fn bind(
        host: &str,
        port: u16,
        dispatcher: Dispatcher,
        read_timeout: Duration,
    ) -> io::Result<Server> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Server {
            listener,
            dispatcher: Arc::new(dispatcher),
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "server listening"),
            Err(_) => info!("server listening"),
        }
        loop {
            let (socket, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    error!(%err, "failed to accept connection");
                    break;
                }
            };
            let stream = MsgStream::from_tcp(socket, self.read_timeout);
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(serve_connection(stream, dispatcher));
        }
    }
}

async fn serve_connection(mut stream: MsgStream, dispatcher: Arc<Dispatcher>) {
    let peer = stream.peer_addr().to_string();
    loop {
        let request = match stream.read_message().await {
            Ok(msg) => msg,
            Err(StreamError::Timeout) => {
                info!(%peer, "connection idle past deadline, closing");
                break;
            }
            Err(StreamError::Closed) => {
                debug!(%peer, "peer closed connection");
                break;
            }
            Err(err) => {
                error!(%peer, %err, "failed to read request");
                break;
            }
        };

        let tag = request.tag();
        let Some(handler) = dispatcher.lookup(tag) else {
            error!(%peer, %tag, "no handler registered for tag");
            break;
        };

        let response = handler.handle(request, &peer).await;
        if let Err(err) = stream.write_message(&response).await {
            error!(%peer, %err, "failed to write response");
            break;
        }
    }
    stream.close().await;
    debug!(%peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_wire::HealthCheck;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        fn tag(&self) -> MsgTag {
            MsgTag::HealthCheck
        }
        async fn handle(&self, _request: Message, _peer: &str) -> Message {
            Message::HealthCheck(HealthCheck::default())
        }
    }

    async fn spawn_echo_server(read_timeout: Duration) -> SocketAddr {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Echo).unwrap();
        let server = Server::bind("127.0.0.1", 0, dispatcher, read_timeout)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Echo).unwrap();
        assert_eq!(
            dispatcher.register(Echo),
            Err(DispatchError::AlreadyRegistered(MsgTag::HealthCheck))
        );
        assert_eq!(dispatcher.handler_count(), 1);
    }

    #[tokio::test]
    async fn dispatches_and_responds() {
        let addr = spawn_echo_server(TIMEOUT).await;
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut stream = MsgStream::from_tcp(socket, TIMEOUT);
        stream
            .write_message(&Message::HealthCheck(HealthCheck::default()))
            .await
            .unwrap();
        assert!(matches!(
            stream.read_message().await.unwrap(),
            Message::HealthCheck(_)
        ));
    }

    #[tokio::test]
    async fn requests_on_one_connection_are_serial() {
        let addr = spawn_echo_server(TIMEOUT).await;
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut stream = MsgStream::from_tcp(socket, TIMEOUT);
        for _ in 0..3 {
            stream
                .write_message(&Message::HealthCheck(HealthCheck::default()))
                .await
                .unwrap();
            assert!(matches!(
                stream.read_message().await.unwrap(),
                Message::HealthCheck(_)
            ));
        }
    }

    #[tokio::test]
    async fn unknown_tag_closes_only_that_connection() {
        let addr = spawn_echo_server(TIMEOUT).await;

        let mut socket = TcpStream::connect(addr).await.unwrap();
        // Tag 255 (varint FF 01), zero-length payload.
        socket.write_all(&[0xFF, 0x01, 0x00]).await.unwrap();
        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server should close the connection");

        // A fresh connection is unaffected.
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut stream = MsgStream::from_tcp(socket, TIMEOUT);
        stream
            .write_message(&Message::HealthCheck(HealthCheck::default()))
            .await
            .unwrap();
        assert!(matches!(
            stream.read_message().await.unwrap(),
            Message::HealthCheck(_)
        ));
    }

    #[tokio::test]
    async fn idle_connection_is_closed_after_the_deadline() {
        let addr = spawn_echo_server(Duration::from_millis(100)).await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        // Send nothing; the worker should give up and close.
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
            .await
            .expect("server did not close the idle connection")
            .unwrap();
        assert_eq!(n, 0);
    }
}
