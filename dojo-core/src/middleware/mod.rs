pub mod metrics;
pub mod request_id;

pub use metrics::track_http_metrics;
pub use request_id::request_id_middleware;
