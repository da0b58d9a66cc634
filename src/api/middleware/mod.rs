//! API middleware

mod cors;
mod jwt;

pub use cors::cors_layer;
pub use jwt::{AuthError, AuthenticatedUser, Claims, JwtAuth, TOKEN_TTL_HOURS};
