use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use gatehouse_session::{DispatchError, Dispatcher, Handler};
use gatehouse_token::{TokenIssuer, TokenStatus};
use gatehouse_wire::{
    GetUserInfoResponse, HealthCheck, LoginResponse, Message, MsgTag, Response, ResponseCode,
    UserView,
};

use crate::store::{password_digest, UserPatch, UserStore};

/// Wire value for [`ResponseCode::Unknown`] failures the backend produces.
const UNKNOWN_CODE: u32 = 4;

/// Build the backend dispatch table.
pub fn build_dispatcher(
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenIssuer>,
) -> Result<Dispatcher, DispatchError> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(HealthCheckHandler)?;
    dispatcher.register(LoginHandler {
        store: store.clone(),
        tokens: tokens.clone(),
    })?;
    dispatcher.register(GetUserHandler {
        store: store.clone(),
        tokens: tokens.clone(),
    })?;
    dispatcher.register(EditUserHandler { store, tokens: tokens.clone() })?;
    dispatcher.register(AuthHandler { tokens })?;
    Ok(dispatcher)
}

fn envelope(code: ResponseCode) -> Response {
    Response {
        code: code.as_u32(),
    }
}

/// Map a token check onto the subject id or a response code.
///
/// Expired or claim-invalid tokens are an AUTH failure; malformed tokens
/// and signature mismatches are reported as UNKNOWN so the frontend shows
/// a server error rather than silently logging the user out.
fn check_token(tokens: &TokenIssuer, token: &str, peer: &str) -> Result<String, ResponseCode> {
    match tokens.validate(token) {
        Ok(TokenStatus::Valid { subject }) => Ok(subject),
        Ok(TokenStatus::Invalid) => {
            warn!(%peer, "expired or invalid token");
            Err(ResponseCode::Auth)
        }
        Err(err) => {
            error!(%peer, %err, "token validation failed");
            Err(ResponseCode::Unknown(UNKNOWN_CODE))
        }
    }
}

struct HealthCheckHandler;

#[async_trait]
impl Handler for HealthCheckHandler {
    fn tag(&self) -> MsgTag {
        MsgTag::HealthCheck
    }

    async fn handle(&self, _request: Message, _peer: &str) -> Message {
        Message::HealthCheck(HealthCheck::default())
    }
}

struct LoginHandler {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenIssuer>,
}

fn login_failure(code: ResponseCode) -> Message {
    Message::LoginResponse(LoginResponse {
        response: Some(envelope(code)),
        token: String::new(),
    })
}

#[async_trait]
impl Handler for LoginHandler {
    fn tag(&self) -> MsgTag {
        MsgTag::LoginRequest
    }

    async fn handle(&self, request: Message, peer: &str) -> Message {
        let Message::LoginRequest(req) = request else {
            return login_failure(ResponseCode::Unknown(UNKNOWN_CODE));
        };
        let user = match self.store.fetch(&req.id).await {
            Ok(user) => user,
            Err(err) => {
                error!(%peer, %err, "login lookup failed");
                return login_failure(ResponseCode::Db);
            }
        };
        let valid = user
            .map(|u| u.password_hash == password_digest(&req.password))
            .unwrap_or(false);
        if !valid {
            warn!(%peer, id = %req.id, "rejected login");
            return login_failure(ResponseCode::Auth);
        }
        info!(%peer, id = %req.id, "login succeeded");
        Message::LoginResponse(LoginResponse {
            response: Some(envelope(ResponseCode::Ok)),
            token: self.tokens.issue(&req.id),
        })
    }
}

struct GetUserHandler {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenIssuer>,
}

fn get_user_failure(code: ResponseCode) -> Message {
    Message::GetUserInfoResponse(GetUserInfoResponse {
        response: Some(envelope(code)),
        user: None,
    })
}

#[async_trait]
impl Handler for GetUserHandler {
    fn tag(&self) -> MsgTag {
        MsgTag::GetUserInfoRequest
    }

    async fn handle(&self, request: Message, peer: &str) -> Message {
        let Message::GetUserInfoRequest(req) = request else {
            return get_user_failure(ResponseCode::Unknown(UNKNOWN_CODE));
        };
        let subject = match check_token(&self.tokens, &req.token, peer) {
            Ok(subject) => subject,
            Err(code) => return get_user_failure(code),
        };
        match self.store.fetch(&subject).await {
            Ok(Some(user)) => {
                info!(%peer, id = %subject, "served user info");
                Message::GetUserInfoResponse(GetUserInfoResponse {
                    response: Some(envelope(ResponseCode::Ok)),
                    user: Some(UserView {
                        id: user.id,
                        password: String::new(),
                        nickname: user.nickname,
                        pic_path: user.pic_path,
                    }),
                })
            }
            Ok(None) => {
                info!(%peer, id = %subject, "no such user");
                get_user_failure(ResponseCode::Input)
            }
            Err(err) => {
                error!(%peer, %err, "user lookup failed");
                get_user_failure(ResponseCode::Db)
            }
        }
    }
}

struct EditUserHandler {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenIssuer>,
}

#[async_trait]
impl Handler for EditUserHandler {
    fn tag(&self) -> MsgTag {
        MsgTag::EditUserInfoRequest
    }

    async fn handle(&self, request: Message, peer: &str) -> Message {
        let Message::EditUserInfoRequest(req) = request else {
            return Message::Response(envelope(ResponseCode::Unknown(UNKNOWN_CODE)));
        };
        let subject = match check_token(&self.tokens, &req.token, peer) {
            Ok(subject) => subject,
            Err(code) => return Message::Response(envelope(code)),
        };
        // Empty wire fields mean "leave unchanged". The row updated is the
        // token's subject; a caller-supplied id is ignored.
        let view = req.user.unwrap_or_default();
        let patch = UserPatch {
            id: subject.clone(),
            password_hash: (!view.password.is_empty())
                .then(|| password_digest(&view.password)),
            nickname: (!view.nickname.is_empty()).then(|| view.nickname.clone()),
            pic_path: (!view.pic_path.is_empty()).then(|| view.pic_path.clone()),
        };
        match self.store.update(&patch).await {
            Ok(()) => {
                info!(%peer, id = %subject, "updated user info");
                Message::Response(envelope(ResponseCode::Ok))
            }
            Err(err) => {
                error!(%peer, %err, "user update failed");
                Message::Response(envelope(ResponseCode::Db))
            }
        }
    }
}

struct AuthHandler {
    tokens: Arc<TokenIssuer>,
}

#[async_trait]
impl Handler for AuthHandler {
    fn tag(&self) -> MsgTag {
        MsgTag::AuthRequest
    }

    async fn handle(&self, request: Message, peer: &str) -> Message {
        let Message::AuthRequest(req) = request else {
            return Message::Response(envelope(ResponseCode::Auth));
        };
        match check_token(&self.tokens, &req.token, peer) {
            Ok(subject) => {
                info!(%peer, id = %subject, "token authenticated");
                Message::Response(envelope(ResponseCode::Ok))
            }
            // For a bare validity check every failure is an AUTH failure.
            Err(_) => Message::Response(envelope(ResponseCode::Auth)),
        }
    }
}
