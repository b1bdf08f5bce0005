//! Authenticated session.
//!
//! The session is handed to the client explicitly; identity is never
//! derived from the token inside the client.

use chat_types::UserId;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A bearer token for the realtime endpoint. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the transport handshake only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Intentionally opaque debug to avoid logging secrets
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken([REDACTED])")
    }
}

/// The logged-in user and their access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user_id: UserId,
    token: AccessToken,
}

impl Session {
    /// Create a session.
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: AccessToken::new(token),
        }
    }

    /// The logged-in user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The access token.
    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Replace the token after an external refresh.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = AccessToken::new(token);
        self
    }
}
