//! layer-gateway - HTTP boundary for the layer completion router
//!
//! Exposes `POST /v1/complete`, gate administration under `/v1/gates`, and an
//! unauthenticated `/api/status` probe. Callers authenticate with a bearer
//! token that maps to an owner id.

pub mod auth;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::{ApiKey, Authenticator};
pub use error::ApiError;
pub use server::{GatewayServer, GatewayState};
