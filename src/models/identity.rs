//! Federated identity model - binds a user to an external provider account.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A (provider, provider-user-id) binding.
///
/// The pair is unique system-wide; a user holds at most one link per
/// provider. Provider tokens are stored through the encryption codec.
#[derive(Debug, Clone, FromRow)]
pub struct FederatedIdentity {
    pub identity_id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub provider_email: Option<String>,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl FederatedIdentity {
    pub fn new(
        user_id: Uuid,
        provider: String,
        provider_user_id: String,
        provider_email: Option<String>,
        access_token_enc: String,
        refresh_token_enc: Option<String>,
    ) -> Self {
        Self {
            identity_id: Uuid::new_v4(),
            user_id,
            provider,
            provider_user_id,
            provider_email,
            access_token_enc,
            refresh_token_enc,
            created_utc: Utc::now(),
        }
    }
}
