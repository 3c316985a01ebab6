//! Authentication and authorization module
//!
//! - Token issuance and validation (`jwt`)
//! - Password hashing with Argon2 and the password policy (`password`)
//! - Session bookkeeping and revocation (`session`)
//! - Password reset tokens (`reset`) and one-time login codes (`one_time_code`)
//! - Middleware guarding routes by token type (`middleware`)
//! - The service the HTTP handlers call (`service`)

pub mod jwt;
pub mod middleware;
pub mod one_time_code;
pub mod password;
pub mod reset;
pub mod service;
pub mod session;

pub use jwt::{Claims, JwtConfig, JwtError, TokenType};
pub use middleware::{require_access, require_refresh, AuthError, AuthenticatedUser};
pub use one_time_code::OneTimeCodeManager;
pub use password::{hash_password, validate_password_policy, verify_password, PasswordConfig};
pub use reset::{PasswordResetManager, ResetTokenSigner};
pub use service::{
    AccessTokenResponse, AuthService, AuthSetupError, EmailRequest, LoginRequest, LogoutRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest, TokenPairResponse, UserInfo, VerifyCodeRequest,
};
pub use session::{Session, SessionManager};
