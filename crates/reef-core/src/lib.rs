//! Core types and utilities for the Reef distributed fish-and-sharks simulation.

pub mod types;
pub mod snapshot;
pub mod config;
pub mod error;
pub mod stats;

pub use error::{Error, Result};
pub use types::*;
pub use snapshot::*;
pub use config::*;
pub use stats::*;
