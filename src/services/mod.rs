pub mod auth;
pub mod crypto;
pub mod database;
pub mod email;
pub mod error;
pub mod lockout;
pub mod oauth;
pub mod rate_limit;
pub mod reset;
pub mod store;

pub use auth::AuthService;
pub use crypto::TokenCipher;
pub use database::Database;
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use lockout::LockoutTracker;
pub use oauth::{OAuthService, ProviderLinkStatus, ProviderProfile, ProviderTokens};
pub use rate_limit::{RateLimiter, RatePolicy};
pub use reset::{PasswordResetService, ResetValidation};
pub use store::{AuthStore, StoreError};
