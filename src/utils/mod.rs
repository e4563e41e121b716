//! # Utility Modules
//!
//! - **Logging**: tracing subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: thread-safe observability counters

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot};
