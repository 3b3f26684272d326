//! OAuth federation against a single authorization-code-grant provider.
//!
//! The HTTP legs (redirect, callback) live in the handlers; this service
//! owns the provider calls and the profile-to-account resolution:
//! existing link -> email match (silent linking) -> brand-new user.
//! Provider tokens pass through the encryption codec before the link row
//! is persisted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OAuthProviderConfig;
use crate::models::{FederatedIdentity, User};
use crate::services::crypto::TokenCipher;
use crate::services::store::{AuthStore, StoreError};
use crate::services::ServiceError;

/// Maximum suffix probes before the timestamp fallback guarantees
/// termination of the username collision loop.
const USERNAME_MAX_ATTEMPTS: u32 = 1000;
const USERNAME_MAX_LEN: usize = 20;

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// User-info endpoint response (Google-shaped).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub verified_email: bool,
    pub name: Option<String>,
}

/// Per-provider link status for the current user.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProviderLinkStatus {
    pub provider: String,
    pub linked: bool,
}

#[derive(Clone)]
pub struct OAuthService {
    store: Arc<dyn AuthStore>,
    cipher: TokenCipher,
    config: Option<OAuthProviderConfig>,
    http: reqwest::Client,
}

impl OAuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        cipher: TokenCipher,
        config: Option<OAuthProviderConfig>,
    ) -> Self {
        Self {
            store,
            cipher,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// The configured provider, or a "not configured" condition.
    pub fn provider(&self) -> Result<&OAuthProviderConfig, ServiceError> {
        self.config.as_ref().ok_or(ServiceError::ProviderNotConfigured)
    }

    /// Build the authorization redirect for leg 1.
    pub fn authorize_url(&self, state: &str) -> Result<String, ServiceError> {
        let provider = self.provider()?;
        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            provider.auth_url,
            urlencoding::encode(&provider.client_id),
            urlencoding::encode(&provider.redirect_uri),
            urlencoding::encode(&provider.scopes),
            urlencoding::encode(state),
        ))
    }

    /// Exchange the authorization code for provider tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ServiceError> {
        let provider = self.provider()?;
        let response = self
            .http
            .post(&provider.token_url)
            .form(&[
                ("code", code),
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
                ("redirect_uri", provider.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to contact provider token endpoint");
                ServiceError::ProviderError(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Provider token exchange failed");
            return Err(ServiceError::ProviderError(format!(
                "token exchange returned {}",
                status
            )));
        }

        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("invalid token response: {}", e)))
    }

    /// Fetch the user profile with the returned access token.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError> {
        let provider = self.provider()?;
        let response = self
            .http
            .get(&provider.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to fetch provider profile");
                ServiceError::ProviderError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ProviderError(format!(
                "user-info endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<ProviderProfile>()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("invalid profile response: {}", e)))
    }

    /// Resolve a provider profile to a local account.
    ///
    /// Order: existing link, then email match (silent linking), then a new
    /// password-less user. Returns the user and whether it was created.
    pub async fn resolve_user(
        &self,
        profile: &ProviderProfile,
        tokens: &ProviderTokens,
    ) -> Result<(User, bool), ServiceError> {
        let provider_name = self.provider()?.provider.clone();

        // Fast path for returning users.
        if let Some(identity) = self
            .store
            .find_identity(&provider_name, &profile.id)
            .await?
        {
            let user = self
                .store
                .find_user_by_id(identity.user_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::Internal(anyhow::anyhow!("User missing for identity link"))
                })?;
            return Ok((user, false));
        }

        let access_token_enc = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_token_enc = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        // Silent account linking by email.
        if let Some(email) = &profile.email {
            if let Some(user) = self.store.find_user_by_email(email).await? {
                let identity = FederatedIdentity::new(
                    user.user_id,
                    provider_name.clone(),
                    profile.id.clone(),
                    profile.email.clone(),
                    access_token_enc.clone(),
                    refresh_token_enc.clone(),
                );
                match self.store.insert_identity(&identity).await {
                    Ok(()) => {}
                    // Concurrent callback won the insert; fall through to
                    // the lookup below.
                    Err(StoreError::Duplicate(_)) => {
                        return self.retry_identity_lookup(&provider_name, &profile.id).await;
                    }
                    Err(e) => return Err(e.into()),
                }

                if profile.verified_email && !user.email_verified {
                    self.store
                        .update_email_verified(user.user_id, true)
                        .await?;
                }

                tracing::info!(user_id = %user.user_id, provider = %provider_name, "Linked provider to existing account");
                return Ok((user, false));
            }
        }

        // Brand-new account.
        let username = self.generate_username(profile.name.as_deref()).await?;
        let user = User::new_federated(username, profile.email.clone(), profile.verified_email);
        let identity = FederatedIdentity::new(
            user.user_id,
            provider_name.clone(),
            profile.id.clone(),
            profile.email.clone(),
            access_token_enc,
            refresh_token_enc,
        );

        match self.store.insert_user_with_identity(&user, &identity).await {
            Ok(()) => {
                tracing::info!(user_id = %user.user_id, provider = %provider_name, "Created account from federated sign-in");
                Ok((user, true))
            }
            Err(StoreError::Duplicate(_)) => {
                // Either the identity race was lost or the username slipped
                // through the pre-check; the lookup settles which user won.
                self.retry_identity_lookup(&provider_name, &profile.id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn retry_identity_lookup(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<(User, bool), ServiceError> {
        let identity = self
            .store
            .find_identity(provider, provider_user_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!(
                    "Identity insert conflicted but no existing link was found"
                ))
            })?;
        let user = self
            .store
            .find_user_by_id(identity.user_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("User missing for identity link"))
            })?;
        Ok((user, false))
    }

    /// Derive a free username from the profile display name.
    ///
    /// Bounded optimistic retry: base, base2, base3, ... up to 1000 probes,
    /// then a timestamp suffix guarantees termination.
    async fn generate_username(&self, display_name: Option<&str>) -> Result<String, ServiceError> {
        let base = derive_username_base(display_name);

        for attempt in 0..USERNAME_MAX_ATTEMPTS {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                format!("{}{}", base, attempt + 1)
            };
            if self
                .store
                .find_user_by_username(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }

        Ok(format!("{}{}", base, chrono::Utc::now().timestamp()))
    }

    /// Link status per configured provider for one user.
    pub async fn status(&self, user_id: uuid::Uuid) -> Result<Vec<ProviderLinkStatus>, ServiceError> {
        let provider = self.provider()?;
        let identities = self.store.find_identities_for_user(user_id).await?;
        let linked = identities.iter().any(|i| i.provider == provider.provider);
        Ok(vec![ProviderLinkStatus {
            provider: provider.provider.clone(),
            linked,
        }])
    }

    /// Remove a provider link, unless it is the account's only way in.
    pub async fn unlink(&self, user: &User, provider: &str) -> Result<(), ServiceError> {
        let identities = self.store.find_identities_for_user(user.user_id).await?;
        let has_link = identities.iter().any(|i| i.provider == provider);
        if !has_link {
            return Err(ServiceError::LinkNotFound(provider.to_string()));
        }

        if user.password_hash.is_none() && identities.len() <= 1 {
            return Err(ServiceError::LastLoginMethod);
        }

        self.store.delete_identity(user.user_id, provider).await?;
        tracing::info!(user_id = %user.user_id, provider = %provider, "Unlinked provider");
        Ok(())
    }
}

/// Lowercase alphanumeric of the display name, truncated to 20 characters,
/// falling back to "user" when nothing survives.
fn derive_username_base(display_name: Option<&str>) -> String {
    let cleaned: String = display_name
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(USERNAME_MAX_LEN)
        .collect();

    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}
