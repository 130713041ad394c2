//! Port abstraction for the authentication collaborator.

use async_trait::async_trait;

use crate::domain::user::AuthSession;

use super::define_port_error;

define_port_error! {
    /// Errors raised while resolving the current session.
    pub enum SessionProviderError {
        /// The session store could not be read.
        Unavailable { message: String } => "session unavailable: {message}",
    }
}

/// Supplies the signed-in user id and access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Current session, `None` when signed out.
    async fn current_session(&self) -> Result<Option<AuthSession>, SessionProviderError>;
}

/// Session provider returning a fixed session.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionProvider(Option<AuthSession>);

impl StaticSessionProvider {
    /// Always signed in as `session`.
    #[must_use]
    pub const fn signed_in(session: AuthSession) -> Self {
        Self(Some(session))
    }

    /// Always signed out.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Result<Option<AuthSession>, SessionProviderError> {
        Ok(self.0.clone())
    }
}
