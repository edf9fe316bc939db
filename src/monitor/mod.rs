//! Observability: injected metric registry, alerting, ops endpoints.

mod alerts;
mod metrics;
mod server;

pub use alerts::{Alert, AlertManager, AlertSeverity};
pub use metrics::Metrics;
pub use server::serve;
