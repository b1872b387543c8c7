//! Authentication: token lifecycle and user accounts.

pub mod service;
pub mod tokens;

pub use service::{AuthConfig, AuthError, AuthResponse, AuthService};
pub use tokens::{
    Claims, RefreshedAccessToken, TokenConfig, TokenError, TokenKind, TokenPair, TokenService,
};
