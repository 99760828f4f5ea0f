//! Pre-deployment and health validation

pub mod health;
pub mod pre;
pub mod window;

pub use health::{AssetHealth, HealthCheck, HealthMode, HealthSettings, HealthValidator};
pub use pre::PreValidator;
pub use window::MaintenanceWindow;
