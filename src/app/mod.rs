//! Application layer: configuration and orchestration.

mod config;
mod orchestrator;

pub use config::{
    BasisArbSection, Config, DryRunConfig, MonitoringConfig, PersistenceConfig, RiskConfig,
    StrategiesConfig, SystemConfig, TriArbSection, VenueConfig,
};
pub use orchestrator::Orchestrator;
