//! OAuth2 credential lifecycle
//!
//! [`CredentialManager`] owns the one credential a process uses:
//! - Cached access token returned while it is outside the safety buffer
//! - Refresh-token grant against the provider's token endpoint, retried on
//!   network failures and retryable statuses
//! - Single-flight refresh: concurrent callers share one in-progress refresh
//! - Rotated refresh tokens replace the old one atomically and are announced
//!   on a broadcast channel so the caller can persist them

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

pub mod persist;

pub use persist::{persist_refresh_token, RotationWriter};

use crate::client::read_body_preview;
use crate::client::retry::{extract_error_type, is_retryable_status, RetryContext};
use crate::config::{
    ConfigError, RetryPolicy, BODY_PREVIEW_BYTES, DEFAULT_TOKEN_LIFETIME_SECS,
};
use crate::metrics::{record_retry_backoff, record_token_refresh};

/// Environment variable holding the OAuth2 client id.
pub const ENV_CLIENT_ID: &str = "AMAZON_CLIENT_ID";
/// Environment variable holding the OAuth2 client secret.
pub const ENV_CLIENT_SECRET: &str = "AMAZON_CLIENT_SECRET";
/// Environment variable holding the long-lived refresh token.
pub const ENV_REFRESH_TOKEN: &str = "AMAZON_REFRESH_TOKEN";

const ROTATION_CHANNEL_CAPACITY: usize = 8;

/// Credential errors. Fatal to a run: no call can proceed without a token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    /// Token endpoint answered with a non-retryable status
    #[error("token endpoint rejected the refresh grant with status {status}: {body_preview}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Bounded provider error body
        body_preview: String,
    },

    /// Every attempt failed with a retryable error
    #[error("token refresh failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure reason
        last_error: String,
    },

    /// Token endpoint returned a success status with an unusable body
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Static client registration plus the current refresh token.
#[derive(Clone)]
pub struct ClientCredentials {
    /// OAuth2 client id, also sent as the API client id header
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Long-lived refresh token
    pub refresh_token: String,
}

impl ClientCredentials {
    /// Build from explicit values.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Read the three values from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        Ok(Self::new(
            read(ENV_CLIENT_ID)?,
            read(ENV_CLIENT_SECRET)?,
            read(ENV_REFRESH_TOKEN)?,
        ))
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Current credential snapshot. Mutated only by a successful refresh.
#[derive(Clone)]
pub struct Credential {
    access_token: String,
    expires_at: DateTime<Utc>,
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

impl Credential {
    fn unauthenticated(client: ClientCredentials) -> Self {
        Self {
            access_token: String::new(),
            expires_at: DateTime::<Utc>::MIN_UTC,
            refresh_token: client.refresh_token,
            client_id: client.client_id,
            client_secret: client.client_secret,
        }
    }

    /// Bearer token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Expiry reported by the provider
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Refresh token currently in use (rotated value after a rotation)
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// OAuth2 client id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether the access token is usable at `now` with the given safety buffer.
    pub fn is_fresh(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        !self.access_token.is_empty() && now + buffer < self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &fingerprint(&self.access_token))
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Emitted when the provider returns a different refresh token.
#[derive(Clone)]
pub struct RefreshTokenRotation {
    /// New refresh token, to be persisted by the subscriber
    pub refresh_token: String,
    /// Short SHA-256 fingerprint safe for logs
    pub fingerprint: String,
    /// When the rotation was observed
    pub rotated_at: DateTime<Utc>,
}

impl std::fmt::Debug for RefreshTokenRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenRotation")
            .field("fingerprint", &self.fingerprint)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}

/// Short hex SHA-256 prefix of a secret, for logs.
pub fn fingerprint(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let digest = Sha256::digest(secret.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, CredentialError>>>;

struct Inner {
    http: Client,
    token_url: String,
    retry: RetryPolicy,
    safety_buffer: chrono::Duration,
    credential: RwLock<Credential>,
    in_flight: Mutex<Option<RefreshFuture>>,
    rotations: broadcast::Sender<RefreshTokenRotation>,
    refresh_requests: AtomicU64,
    rotation_count: AtomicU64,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<RefreshFuture>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owner of the process-wide OAuth2 credential.
///
/// Cheap to clone; clones share the credential, the in-flight refresh and the
/// rotation channel.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("token_url", &self.inner.token_url)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Create a manager that refreshes against `token_url` using the shared client.
    ///
    /// Tokens count as expired `safety_buffer_secs` before their reported expiry.
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client: ClientCredentials,
        retry: RetryPolicy,
        safety_buffer_secs: i64,
    ) -> Self {
        let (rotations, _) = broadcast::channel(ROTATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                http,
                token_url: token_url.into(),
                retry,
                safety_buffer: chrono::Duration::seconds(safety_buffer_secs.max(0)),
                credential: RwLock::new(Credential::unauthenticated(client)),
                in_flight: Mutex::new(None),
                rotations,
                refresh_requests: AtomicU64::new(0),
                rotation_count: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to refresh token rotations.
    pub fn subscribe_rotations(&self) -> broadcast::Receiver<RefreshTokenRotation> {
        self.inner.rotations.subscribe()
    }

    /// Token endpoint calls issued so far (attempts included).
    pub fn refresh_requests(&self) -> u64 {
        self.inner.refresh_requests.load(Ordering::SeqCst)
    }

    /// Rotations observed so far.
    pub fn rotation_count(&self) -> u64 {
        self.inner.rotation_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the current credential without refreshing.
    pub async fn current(&self) -> Credential {
        self.inner.credential.read().await.clone()
    }

    /// Return a valid credential, refreshing when needed.
    ///
    /// A cached token outside the safety buffer is returned without a network
    /// call. Otherwise the caller joins the in-flight refresh or starts one.
    /// With `force_refresh` the caller waits for any in-flight refresh to
    /// settle and then starts a new one (which later callers may join), so at
    /// most one refresh is ever in flight.
    pub async fn get_access_token(&self, force_refresh: bool) -> Result<Credential, CredentialError> {
        if !force_refresh {
            let current = self.inner.credential.read().await;
            if current.is_fresh(Utc::now(), self.inner.safety_buffer) {
                return Ok(current.clone());
            }
        }

        if !force_refresh {
            return self.join_or_start(None).await;
        }

        loop {
            let pending = {
                let mut slot = self.inner.slot();
                match slot.as_ref() {
                    Some(existing) => existing.clone(),
                    None => {
                        let flight = Self::start_flight(self.inner.clone());
                        *slot = Some(flight.clone());
                        drop(slot);
                        return flight.await;
                    }
                }
            };
            debug!("Forced refresh waiting for in-flight refresh to settle");
            let _ = pending.await;
        }
    }

    /// Refresh after the provider rejected `used_token` with a 401.
    ///
    /// If the credential already moved past `used_token` (another caller
    /// refreshed meanwhile) the current credential is returned as is, so a
    /// burst of 401s for the same token collapses into one refresh.
    pub async fn refresh_after_rejection(
        &self,
        used_token: &str,
    ) -> Result<Credential, CredentialError> {
        {
            let current = self.inner.credential.read().await;
            if current.access_token != used_token
                && current.is_fresh(Utc::now(), self.inner.safety_buffer)
            {
                debug!("Token already refreshed by another caller");
                return Ok(current.clone());
            }
        }
        self.join_or_start(Some(used_token)).await
    }

    /// Join the in-flight refresh or start one. With the slot held, a
    /// credential installed by a flight that just finished is reused, unless
    /// it is the `rejected` token.
    async fn join_or_start(&self, rejected: Option<&str>) -> Result<Credential, CredentialError> {
        let flight = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    // Flights install before clearing the slot, so no writer holds the lock here.
                    if let Ok(current) = self.inner.credential.try_read() {
                        if current.is_fresh(Utc::now(), self.inner.safety_buffer)
                            && rejected != Some(current.access_token.as_str())
                        {
                            debug!("Credential refreshed by a finished flight, reusing it");
                            return Ok(current.clone());
                        }
                    }
                    let flight = Self::start_flight(self.inner.clone());
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    fn start_flight(inner: Arc<Inner>) -> RefreshFuture {
        async move {
            let result = refresh_with_retry(&inner).await;
            *inner.slot() = None;
            result
        }
        .boxed()
        .shared()
    }
}

async fn refresh_with_retry(inner: &Inner) -> Result<Credential, CredentialError> {
    let snapshot = inner.credential.read().await.clone();
    let max_attempts = inner.retry.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        inner.refresh_requests.fetch_add(1, Ordering::SeqCst);
        info!(attempt, max_attempts, client_id = %snapshot.client_id, "Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", snapshot.refresh_token.as_str()),
            ("client_id", snapshot.client_id.as_str()),
            ("client_secret", snapshot.client_secret.as_str()),
        ];
        let error_type = match inner.http.post(&inner.token_url).form(&form).send().await {
            Ok(response) if response.status().is_success() => {
                let body: TokenResponse = response.json().await.map_err(|e| {
                    record_token_refresh("failure");
                    CredentialError::InvalidResponse(e.to_string())
                })?;
                let credential = install(inner, &snapshot, body).await;
                record_token_refresh("success");
                info!(
                    attempt,
                    expires_at = %credential.expires_at,
                    "Access token refreshed"
                );
                return Ok(credential);
            }
            Ok(response) => {
                let status = response.status();
                let preview = read_body_preview(response, BODY_PREVIEW_BYTES).await;
                if !is_retryable_status(status.as_u16()) {
                    record_token_refresh("failure");
                    error!(status = status.as_u16(), body = %preview, "Token refresh rejected");
                    return Err(CredentialError::Rejected {
                        status: status.as_u16(),
                        body_preview: preview,
                    });
                }
                last_error = format!("status {}: {preview}", status.as_u16());
                extract_error_type(Some(status), None)
            }
            Err(e) => {
                last_error = format!("network error: {e}");
                extract_error_type(None, Some(&e))
            }
        };

        if attempt < max_attempts {
            let delay = inner.retry.backoff(attempt - 1);
            let ctx = RetryContext::new(
                attempt,
                max_attempts,
                error_type,
                delay,
                "POST token",
                &last_error,
            );
            warn!("{}", ctx.format_retry());
            record_retry_backoff(delay, attempt);
            tokio::time::sleep(delay).await;
        }
    }

    record_token_refresh("failure");
    error!(attempts = max_attempts, error = %last_error, "Token refresh exhausted retries");
    Err(CredentialError::Exhausted {
        attempts: max_attempts,
        last_error,
    })
}

/// Store a refresh response as the new credential in one write.
async fn install(inner: &Inner, sent: &Credential, body: TokenResponse) -> Credential {
    let lifetime = body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    let rotated = body
        .refresh_token
        .filter(|t| !t.is_empty() && *t != sent.refresh_token);

    let credential = {
        let mut current = inner.credential.write().await;
        current.access_token = body.access_token;
        current.expires_at = Utc::now() + chrono::Duration::seconds(lifetime);
        if let Some(new_token) = &rotated {
            current.refresh_token = new_token.clone();
        }
        current.clone()
    };

    if let Some(new_token) = rotated {
        let fingerprint = fingerprint(&new_token);
        inner.rotation_count.fetch_add(1, Ordering::SeqCst);
        warn!(
            fingerprint = %fingerprint,
            "Provider rotated the refresh token; persist the new value"
        );
        // No subscribers is fine, the warning above is the fallback signal.
        let _ = inner.rotations.send(RefreshTokenRotation {
            refresh_token: new_token,
            fingerprint,
            rotated_at: Utc::now(),
        });
    }

    credential
}
