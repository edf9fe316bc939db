//! Venue gateway implementations.

pub mod kcex;
pub mod nobitex;
pub mod simulated;

pub use kcex::KcexGateway;
pub use nobitex::NobitexGateway;
pub use simulated::{FillSimulator, SimulatedGateway};
