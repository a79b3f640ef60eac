//! Password, token and OAuth authentication

pub mod oauth;
pub mod password;
pub mod service;
pub mod token;

pub use oauth::{HttpIdentityVerifier, IdentityVerifier, VerifiedIdentity};
pub use password::{hash_password, verify_password, PasswordCheck};
pub use service::{AuthService, LoginOutcome, RegisterRequest, TokenPair};
pub use token::{Claims, TokenService, TokenType};

use thiserror::Error;

use crate::database::DatabaseError;
use crate::devices::DeviceError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// OAuth-only account: reported separately from a wrong password
    #[error("Account has no password set")]
    PasswordNotSet,

    #[error("User account is inactive")]
    UserInactive,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Unknown role: {0}")]
    InvalidRole(String),

    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Current password is incorrect")]
    IncorrectCurrentPassword,

    #[error("Identity rejected: {0}")]
    IdentityRejected(String),

    #[error("Identity verifier unavailable: {0}")]
    VerifierUnavailable(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Auth configuration error: {0}")]
    Configuration(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(DatabaseError::from(err))
    }
}
