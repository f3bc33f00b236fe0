//! HTTP API: registration, on-demand sync, deletion, OAuth callback, status.

pub mod auth;
pub mod response;
pub mod routes;
pub mod status;
pub mod sync;

pub use routes::*;
