//! Domain models

pub mod asset;
pub mod deployment;
pub mod events;
pub mod execution;
pub mod patch;
