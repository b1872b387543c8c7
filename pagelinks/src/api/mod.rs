//! HTTP API.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use middleware::AuthUser;
pub use server::{ApiServer, ApiServerConfig, AppState};
