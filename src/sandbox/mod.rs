//! Sandbox module containing all execution-related components.

pub mod config;
pub mod executor;
pub mod fetch;
pub mod instance;
pub mod io;
pub mod limits;
pub mod marshal;
pub mod runner;
mod state;
