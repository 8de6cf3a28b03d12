//! Prometheus-based monitoring for debates and LLM usage.
//!
//! ```ignore
//! use consensus_forge::metrics::{gather_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_round();
//! println!("{}", gather_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{CacheLookup, MetricsCollector};
pub use prometheus::{gather_metrics, init_metrics, REGISTRY};
