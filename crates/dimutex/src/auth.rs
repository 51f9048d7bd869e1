//! Credentials for the storage API.
//!
//! An [`Authenticator`] produces the `Authorization` header value attached to
//! every request, or `None` when talking to an emulator that accepts
//! anonymous calls. Token caching and refresh are left to the provider.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// OAuth scopes needed to create and delete lock objects.
pub const STORAGE_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Supplies the `Authorization` header value for storage requests.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the header value, or `None` to send the request unauthenticated.
    async fn authorization(&self) -> Result<Option<String>>;
}

/// Sends no credentials. Used against local emulators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed bearer token.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wraps an already-issued bearer token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Authenticator for StaticToken {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(Some(format!("Bearer {}", self.token)))
    }
}

/// Google Cloud credentials discovered from the environment.
///
/// Uses application default credentials, the metadata server, or a
/// `gcloud` user login, whichever `gcp_auth` finds first.
pub struct GcpAuthenticator {
    provider: Arc<dyn TokenProvider>,
}

impl fmt::Debug for GcpAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpAuthenticator").finish_non_exhaustive()
    }
}

impl GcpAuthenticator {
    /// Discovers credentials from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no credential source is available.
    pub async fn from_environment() -> Result<Self> {
        let provider = gcp_auth::provider().await.map_err(|e| Error::Auth {
            message: format!("failed to initialize GCP authentication: {e}"),
            source: Some(Box::new(e)),
        })?;
        Ok(Self { provider })
    }

    /// Wraps an existing token provider.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Authenticator for GcpAuthenticator {
    #[instrument(skip(self), level = "debug")]
    async fn authorization(&self) -> Result<Option<String>> {
        debug!("fetching storage access token");
        let token = self
            .provider
            .token(STORAGE_SCOPES)
            .await
            .map_err(|e| Error::Auth {
                message: format!("failed to get storage access token: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Some(format!("Bearer {}", token.as_str())))
    }
}
