use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use gatehouse_session::{Client, ClientError};
use gatehouse_token::peek_subject;
use gatehouse_wire::UserView;

use crate::cache::UserCache;

/// Frontend-facing failures. Anything that is not the caller's fault is
/// reported as `Backend` without internals.
#[derive(Debug, Error)]
pub enum PortalError {
    /// Bad credentials, or a token the backend no longer accepts. The HTTP
    /// layer drops the caller's cookie on this.
    #[error("access denied")]
    Forbidden,
    /// The backend could not be reached or answered strangely.
    #[error("backend error: {0}")]
    Backend(ClientError),
}

fn classify(err: ClientError) -> PortalError {
    if err.is_auth() {
        PortalError::Forbidden
    } else {
        PortalError::Backend(err)
    }
}

/// The frontend's account operations: RPC calls to the backend composed
/// with the read-through user cache.
pub struct Portal {
    client: Client,
    cache: Arc<dyn UserCache>,
}

impl Portal {
    pub fn new(client: Client, cache: Arc<dyn UserCache>) -> Portal {
        Portal { client, cache }
    }

    /// Check credentials with the backend and return the issued token.
    pub async fn login(&self, id: &str, password: &str) -> Result<String, PortalError> {
        self.client.login(id, password).await.map_err(classify)
    }

    /// The user view behind a token.
    ///
    /// Serves from the cache when possible, but still issues the cheap
    /// authenticate RPC on a hit so a revoked or expired token is caught.
    /// On a miss the full record is fetched and the cache repopulated.
    /// Cache trouble degrades to the RPC path rather than failing the
    /// request.
    pub async fn current_user(&self, token: &str) -> Result<UserView, PortalError> {
        let Some(subject) = peek_subject(token) else {
            return Err(PortalError::Forbidden);
        };

        match self.cache.get(&subject).await {
            Ok(Some(cached)) => {
                if self.client.authenticate(token).await.map_err(classify)? {
                    return Ok(UserView {
                        id: subject,
                        password: String::new(),
                        nickname: cached.nickname,
                        pic_path: cached.pic_path,
                    });
                }
                return Err(PortalError::Forbidden);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, id = %subject, "cache read failed, falling back to backend");
            }
        }

        let user = self.client.get_user_info(token).await.map_err(classify)?;
        if let Err(err) = self.cache.put(&user).await {
            warn!(%err, id = %user.id, "cache write failed");
        }
        Ok(user)
    }

    /// Apply a field-selective edit, then invalidate the cached projection.
    ///
    /// Empty fields mean "leave unchanged". A failed invalidation is logged
    /// but never fails the request; the entry will be refreshed on the next
    /// miss or swept by the store's own expiry.
    pub async fn edit_user(
        &self,
        token: &str,
        nickname: &str,
        pic_path: &str,
        password: &str,
    ) -> Result<(), PortalError> {
        let view = UserView {
            id: String::new(),
            password: password.to_string(),
            nickname: nickname.to_string(),
            pic_path: pic_path.to_string(),
        };
        self.client
            .edit_user_info(token, view)
            .await
            .map_err(classify)?;

        if let Some(subject) = peek_subject(token) {
            if let Err(err) = self.cache.delete(&subject).await {
                error!(%err, id = %subject, "cache invalidation failed");
            }
        }
        Ok(())
    }
}
