pub mod identity;
pub mod login_attempt;
pub mod reset_token;
pub mod session;
pub mod user;

pub use identity::FederatedIdentity;
pub use login_attempt::LoginAttempt;
pub use reset_token::PasswordResetToken;
pub use session::Session;
pub use user::{SanitizedUser, User};
