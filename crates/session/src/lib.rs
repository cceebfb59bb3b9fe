// Presenti Session
//
// REST-flavored presence input: token -> session exchange, sliding TTL
// expiry, and the axum endpoints that drive it.

pub mod error;
pub mod http;
pub mod sessions;

pub use error::SessionError;
pub use http::router;
pub use sessions::{
    RestSessionAdapter, SessionDescriptor, SessionRegistry, DEFAULT_SESSION_TTL,
};
