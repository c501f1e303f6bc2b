//! Owner of the bearer credential shared by the poll loop and the command loop.

use std::fmt;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::models::LoginResponse;

/// Credentials closer to their expiry than this are refreshed before use.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(350);

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: &'static str },
    #[error("login response unparsable: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("login returned a token with unusable lifetime of {0}s")]
    UnusableLifetime(u64),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    /// No credential was ever obtained; nothing can proceed.
    #[error("unable to obtain any credential: {0}")]
    Fatal(#[source] LoginError),
    /// Refreshing an earlier credential failed; the caller abandons this attempt.
    #[error("credential refresh failed: {0}")]
    Refresh(#[source] LoginError),
}

impl CredentialError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CredentialError::Fatal(_))
    }
}

/// Performs the vendor login with the configured username and password.
pub trait Authenticator: Send + Sync {
    fn login(&self) -> Result<LoginResponse, LoginError>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Fails if the token would not outlive `refresh_skew`, or if its expiry
    /// cannot be represented.
    fn from_login(
        response: LoginResponse,
        now: Instant,
        refresh_skew: Duration,
    ) -> Result<Self, LoginError> {
        let expires_at = now
            .checked_add(Duration::from_secs(response.expires_in))
            .ok_or(LoginError::UnusableLifetime(response.expires_in))?;
        let credential = Self::new(response.access_token, expires_at);
        if !credential.is_valid(now, refresh_skew) {
            return Err(LoginError::UnusableLifetime(response.expires_in));
        }
        Ok(credential)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_valid(&self, now: Instant, refresh_skew: Duration) -> bool {
        match self.expires_at.checked_sub(refresh_skew) {
            Some(refresh_at) => now < refresh_at,
            None => false,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct CredentialStore<A: Authenticator> {
    authenticator: A,
    refresh_skew: Duration,
    current: RwLock<Option<Credential>>,
    // serializes check-and-refresh; readers of a valid credential never take it
    refresh: Mutex<()>,
}

impl<A: Authenticator> CredentialStore<A> {
    pub fn new(authenticator: A) -> Self {
        Self::with_refresh_skew(authenticator, DEFAULT_REFRESH_SKEW)
    }

    pub fn with_refresh_skew(authenticator: A, refresh_skew: Duration) -> Self {
        Self {
            authenticator,
            refresh_skew,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Returns a credential that is valid for at least the refresh skew,
    /// logging in first when needed. Concurrent callers that find the
    /// credential stale wait for a single login and share its result.
    pub fn ensure_valid(&self) -> Result<Credential, CredentialError> {
        if let Some(credential) = self.valid_snapshot() {
            debug!("Token is not up for refresh.");
            return Ok(credential);
        }

        let _guard = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have refreshed while we were waiting
        if let Some(credential) = self.valid_snapshot() {
            return Ok(credential);
        }

        info!(
            "Token expires in less than {} seconds. Fetching a new token.",
            self.refresh_skew.as_secs()
        );
        let login = self.authenticator.login().and_then(|response| {
            Credential::from_login(response, Instant::now(), self.refresh_skew)
        });
        match login {
            Ok(credential) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(credential.clone());
                info!("Successfully retrieved and stored a new token.");
                Ok(credential)
            }
            Err(e) if self.has_credential() => {
                warn!("Failed to refresh token: {e}");
                Err(CredentialError::Refresh(e))
            }
            Err(e) => {
                warn!("Failed to connect to Easee: {e}");
                Err(CredentialError::Fatal(e))
            }
        }
    }

    /// Marks `credential` as expired so the next call logs in again. A newer
    /// credential stored in the meantime is left alone.
    pub fn invalidate(&self, credential: &Credential) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref() == Some(credential) {
            info!("Token was rejected by the API, forcing a new login.");
            *current = Some(Credential::new(credential.token.clone(), Instant::now()));
        }
    }

    /// True once any login has succeeded.
    pub fn has_credential(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn valid_snapshot(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|credential| credential.is_valid(Instant::now(), self.refresh_skew))
            .cloned()
    }
}
