//! Bearer credentials and where they come from
//!
//! [`CredentialProvider`] owns the only cached credential in the process and
//! is the single place that decides whether it is still usable.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use phdi_core::{DeliveryError, Result};

/// OAuth scope covering the Healthcare, Storage and Pub/Sub APIs
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default GCE metadata server root
pub const METADATA_BASE_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// A credential is treated as expired this long before it actually expires
const EXPIRY_SKEW_SECS: i64 = 60;

/// Opaque bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// A token and the identity it was issued for, fetched as one pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub token: AccessToken,
    /// Project the credential belongs to
    pub identity_id: String,
    /// `None` for credentials that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedCredential {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_none_or(|expires_at| now + Duration::seconds(EXPIRY_SKEW_SECS) < expires_at)
    }
}

/// Lifecycle of the cached credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CredentialState {
    #[default]
    Unset,
    Valid(IssuedCredential),
    Expired(IssuedCredential),
}

impl CredentialState {
    fn expire_if_stale(&mut self, now: DateTime<Utc>) {
        let stale = matches!(self, Self::Valid(credential) if !credential.is_usable_at(now));
        if stale {
            self.expire();
        }
    }

    fn expire(&mut self) {
        if let Self::Valid(credential) = self {
            *self = Self::Expired(credential.clone());
        }
    }
}

/// Where credentials are minted
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn default_credentials(&self, scopes: &[String]) -> Result<IssuedCredential>;
}

/// Caches one credential and refreshes it when it is unset or expired.
///
/// The check-then-fetch sequence runs under a mutex, so a provider can be
/// shared between concurrent requests.
pub struct CredentialProvider {
    source: Arc<dyn IdentitySource>,
    scopes: Vec<String>,
    state: Mutex<CredentialState>,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self::with_scopes(source, vec![CLOUD_PLATFORM_SCOPE.to_string()])
    }

    pub fn with_scopes(source: Arc<dyn IdentitySource>, scopes: Vec<String>) -> Self {
        Self {
            source,
            scopes,
            state: Mutex::new(CredentialState::Unset),
        }
    }

    /// A currently valid token, fetching a fresh credential if needed
    pub async fn get_token(&self) -> Result<AccessToken> {
        Ok(self.current().await?.token)
    }

    /// Identity the last token was issued for
    pub async fn get_identity_id(&self) -> Result<String> {
        Ok(self.current().await?.identity_id)
    }

    /// Drop the cached credential and fetch a new one.
    ///
    /// Used after the sink rejected a token we still considered valid.
    pub async fn force_refresh(&self) -> Result<AccessToken> {
        let mut state = self.state.lock().await;
        state.expire();
        let fresh = self.fetch().await?;
        *state = CredentialState::Valid(fresh.clone());
        Ok(fresh.token)
    }

    pub async fn state(&self) -> CredentialState {
        self.state.lock().await.clone()
    }

    async fn current(&self) -> Result<IssuedCredential> {
        let mut state = self.state.lock().await;
        state.expire_if_stale(Utc::now());

        if let CredentialState::Valid(credential) = &*state {
            return Ok(credential.clone());
        }

        let fresh = self.fetch().await?;
        *state = CredentialState::Valid(fresh.clone());
        Ok(fresh)
    }

    async fn fetch(&self) -> Result<IssuedCredential> {
        tracing::debug!(scopes = ?self.scopes, "Fetching default credentials");
        self.source
            .default_credentials(&self.scopes)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Credential acquisition failed"))
    }
}

/// Credentials of the service account attached to the running instance
pub struct MetadataServerIdentity {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

impl MetadataServerIdentity {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, METADATA_BASE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .query(query)
            .send()
            .await
            .map_err(|e| DeliveryError::auth(format!("metadata server unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::auth(format!(
                "metadata server answered {} for {path}",
                response.status().as_u16()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl IdentitySource for MetadataServerIdentity {
    async fn default_credentials(&self, scopes: &[String]) -> Result<IssuedCredential> {
        let token: MetadataToken = self
            .get(
                "/instance/service-accounts/default/token",
                &[("scopes", scopes.join(","))],
            )
            .await?
            .json()
            .await
            .map_err(|e| DeliveryError::auth(format!("malformed token response: {e}")))?;

        let project_id = self
            .get("/project/project-id", &[])
            .await?
            .text()
            .await
            .map_err(|e| DeliveryError::auth(format!("malformed project id: {e}")))?;

        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(DeliveryError::auth("metadata server returned an empty project id"));
        }

        Ok(IssuedCredential {
            token: AccessToken::new(token.access_token),
            identity_id: project_id.to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(token.expires_in)),
        })
    }
}

/// A fixed token, for local runs outside the cloud
pub struct StaticIdentity {
    token: AccessToken,
    project_id: String,
}

impl StaticIdentity {
    pub fn new(token: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
            project_id: project_id.into(),
        }
    }
}

#[async_trait]
impl IdentitySource for StaticIdentity {
    async fn default_credentials(&self, _scopes: &[String]) -> Result<IssuedCredential> {
        Ok(IssuedCredential {
            token: self.token.clone(),
            identity_id: self.project_id.clone(),
            expires_at: None,
        })
    }
}
