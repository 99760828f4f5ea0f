//! Control surface API models

pub mod models;

pub use models::*;
