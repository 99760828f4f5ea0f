//! fleetpatch library
//!
//! Patch rollout across a fleet of assets: staged strategies, health
//! validation, verified rollback and the engine that ties them together.

pub mod app;
pub mod audit;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod monitor;
pub mod remote;
pub mod rollback;
pub mod server;
pub mod storage;
pub mod strategy;
pub mod utils;
pub mod validate;
pub mod workers;
