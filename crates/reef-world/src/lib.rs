//! Partition engine.
//!
//! This crate implements the 3D fish-and-sharks world each worker owns, the
//! ghost layer protocol that stitches neighboring partitions together, and the
//! coordinator-side decomposition and reassembly of the global grid.

pub mod grid;
pub mod neighborhood;
pub mod selection;
pub mod simulation;
pub mod exchange;
pub mod partition;
pub mod reassembly;
pub mod worker;

pub use grid::Grid;
pub use selection::{FirstCandidate, RandomSelection, SelectionPolicy};
pub use simulation::Simulation;
pub use exchange::{merge_layer, GhostExchange};
pub use partition::{decompose, extract_partition};
pub use reassembly::{reassemble, Reassembled};
pub use worker::{run_partition, run_worker, WorkerSummary};
