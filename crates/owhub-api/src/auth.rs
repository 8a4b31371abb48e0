use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

/// Source of the bearer token presented when a channel (re)connects.
///
/// The hub never refreshes tokens itself: it asks the provider on every
/// connection attempt and presents whatever comes back.
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` if the session has none.
    fn token(&self) -> Option<SecretString>;
}

/// A fixed token, typically resolved once from config or the keyring.
#[derive(Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl From<SecretString> for StaticToken {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<SecretString> {
        if self.0.expose_secret().is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    fn token(&self) -> Option<SecretString> {
        (**self).token()
    }
}

/// The authentication frame sent right after the upgrade completes.
pub(crate) fn auth_frame(token: &SecretString) -> String {
    format!("token:{}", token.expose_secret())
}
