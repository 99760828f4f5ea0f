//! Deployment engine, state machine, record store and asset locks

pub mod cancel;
pub mod engine;
pub mod fsm;
pub mod locks;
pub mod store;

pub use engine::{DeploymentEngine, EngineDeps, EngineOptions};
pub use fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
