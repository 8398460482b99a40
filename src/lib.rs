pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

pub use config::{CategoryHours, ConfigError, FacilityConfig};
pub use engine::{Engine, EngineError};
