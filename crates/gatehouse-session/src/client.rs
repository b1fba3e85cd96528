use std::fmt;
use std::time::Duration;

use gatehouse_wire::{
    AuthRequest, EditUserInfoRequest, GetUserInfoRequest, HealthCheck, LoginRequest, Message,
    MsgTag, Response, ResponseCode, UserView,
};

use crate::pool::{PoolError, StreamPool};
use crate::stream::StreamError;

/// RPC client facade over a [`StreamPool`].
///
/// Every call follows the same envelope: acquire a stream, write the
/// request, read the response, restore the stream. On any read or write
/// error the stream is discarded instead, so a stream is never returned to
/// the pool in an unknown I/O state, and a successful response has always
/// been fully consumed before the stream is reused.
#[derive(Clone, Debug)]
pub struct Client {
    pool: StreamPool,
}

impl Client {
    /// Connect to `host:port` with at most `max_streams` pooled connections.
    pub fn new(host: &str, port: u16, max_streams: usize, read_timeout: Duration) -> Client {
        Client {
            pool: StreamPool::new(host, port, max_streams, read_timeout),
        }
    }

    /// Build a client over an existing pool.
    pub fn with_pool(pool: StreamPool) -> Client {
        Client { pool }
    }

    pub async fn login(&self, id: &str, password: &str) -> Result<String, ClientError> {
        let request = Message::LoginRequest(LoginRequest {
            id: id.to_string(),
            password: password.to_string(),
        });
        match self.round_trip(request).await? {
            Message::LoginResponse(res) => {
                check_envelope(res.response.as_ref())?;
                Ok(res.token)
            }
            other => Err(ClientError::Protocol(other.tag())),
        }
    }

    pub async fn get_user_info(&self, token: &str) -> Result<UserView, ClientError> {
        let request = Message::GetUserInfoRequest(GetUserInfoRequest {
            token: token.to_string(),
        });
        match self.round_trip(request).await? {
            Message::GetUserInfoResponse(res) => {
                check_envelope(res.response.as_ref())?;
                res.user
                    .ok_or(ClientError::Protocol(MsgTag::GetUserInfoResponse))
            }
            other => Err(ClientError::Protocol(other.tag())),
        }
    }

    pub async fn edit_user_info(&self, token: &str, user: UserView) -> Result<(), ClientError> {
        let request = Message::EditUserInfoRequest(EditUserInfoRequest {
            token: token.to_string(),
            user: Some(user),
        });
        match self.round_trip(request).await? {
            Message::Response(res) => match ResponseCode::from_u32(res.code) {
                ResponseCode::Ok => Ok(()),
                code => Err(ClientError::Rejected(code)),
            },
            other => Err(ClientError::Protocol(other.tag())),
        }
    }

    /// Check a token with the backend. `Ok(false)` means the backend
    /// answered and rejected it; transport trouble is still an error.
    pub async fn authenticate(&self, token: &str) -> Result<bool, ClientError> {
        let request = Message::AuthRequest(AuthRequest {
            token: token.to_string(),
        });
        match self.round_trip(request).await? {
            Message::Response(res) => match ResponseCode::from_u32(res.code) {
                ResponseCode::Ok => Ok(true),
                ResponseCode::Auth => Ok(false),
                code => Err(ClientError::Rejected(code)),
            },
            other => Err(ClientError::Protocol(other.tag())),
        }
    }

    pub async fn health_check(&self) -> Result<(), ClientError> {
        let request = Message::HealthCheck(HealthCheck::default());
        match self.round_trip(request).await? {
            Message::HealthCheck(_) => Ok(()),
            other => Err(ClientError::Protocol(other.tag())),
        }
    }

    async fn round_trip(&self, request: Message) -> Result<Message, ClientError> {
        let mut stream = self.pool.acquire().await?;
        if let Err(err) = stream.write_message(&request).await {
            self.pool.discard(stream).await;
            return Err(ClientError::Stream(err));
        }
        let response = match stream.read_message().await {
            Ok(msg) => msg,
            Err(err) => {
                self.pool.discard(stream).await;
                return Err(ClientError::Stream(err));
            }
        };
        self.pool.restore(stream).await;
        Ok(response)
    }
}

fn check_envelope(envelope: Option<&Response>) -> Result<(), ClientError> {
    match envelope {
        Some(res) => match ResponseCode::from_u32(res.code) {
            ResponseCode::Ok => Ok(()),
            code => Err(ClientError::Rejected(code)),
        },
        // A typed response must carry its envelope; a missing one is a
        // peer bug, not a user-visible failure.
        None => Err(ClientError::MissingEnvelope),
    }
}

/// Errors surfaced by client calls.
#[derive(Debug)]
pub enum ClientError {
    /// Could not get a stream from the pool.
    Pool(PoolError),
    /// The request or response failed in transit; the stream was discarded.
    Stream(StreamError),
    /// The backend answered with a non-zero response code.
    Rejected(ResponseCode),
    /// The backend answered with an unexpected message variant.
    Protocol(MsgTag),
    /// The backend answered with a typed response missing its envelope.
    MissingEnvelope,
}

impl ClientError {
    /// True when the failure means "bad credentials or bad token" rather
    /// than infrastructure trouble.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Rejected(ResponseCode::Auth))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Pool(err) => write!(f, "pool error: {}", err),
            ClientError::Stream(err) => write!(f, "stream error: {}", err),
            ClientError::Rejected(code) => write!(f, "backend rejected request: {}", code),
            ClientError::Protocol(tag) => write!(f, "unexpected response variant: {}", tag),
            ClientError::MissingEnvelope => write!(f, "response carried no envelope"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Pool(err) => Some(err),
            ClientError::Stream(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PoolError> for ClientError {
    fn from(err: PoolError) -> Self {
        ClientError::Pool(err)
    }
}
