//! Session lifecycle for the platform's export endpoints.
//!
//! Logging in is slow (a browser has to drive the login form), so the session it
//! produces is cached in a [`SessionManager`] and shared by every running job. The
//! login itself sits behind the [`Authenticator`] trait; [`FileAuthenticator`] is the
//! production implementation that reads the credential store written by the login bot.

mod file_authenticator;
mod manager;
mod session;

use crate::errors::AppResult;
use async_trait::async_trait;

pub use file_authenticator::FileAuthenticator;
pub use manager::SessionManager;
pub use session::Session;

/// Produces a valid [`Session`], logging in only when necessary.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns a usable session.
    ///
    /// With `force = false` a cached, unexpired session is preferred. With
    /// `force = true` the cached one is known to be rejected and a new login must be
    /// performed.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationError` when credentials are rejected or the login flow
    /// cannot complete.
    async fn ensure_session(&self, force: bool) -> AppResult<Session>;
}
