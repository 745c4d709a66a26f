//! dojo-core: Shared infrastructure for dojo services.
pub mod error;
pub mod middleware;
pub mod telemetry;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
