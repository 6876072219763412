//! Authentication for the HTTP surface and the websocket

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtVerifier, TokenVerifier, VerifiedIdentity};
pub use middleware::{bearer_token, require_auth};
