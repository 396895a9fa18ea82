//! HTTP surface.

pub mod identity;
pub mod routes;

pub use identity::{IdentityProvider, TrustedHeaderIdentity};
pub use routes::{ApiState, article_routes};
