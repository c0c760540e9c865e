//! Wire-level message types.

use reef_core::{BoundaryLayer, Error, GridSnapshot, PartitionSpec, Rank, Result};
use serde::{Deserialize, Serialize};

/// Message channel, used to match sends with receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Coordinator to worker, once at startup
    Setup,
    /// Ghost layer seeding and refresh
    Halo,
    /// Creatures crossing a partition boundary
    Migrate,
    /// Worker to coordinator, once per generation
    Gather,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Setup(PartitionSpec),
    Layer(BoundaryLayer),
    Snapshot(GridSnapshot),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Setup(_) => "setup",
            Payload::Layer(_) => "layer",
            Payload::Snapshot(_) => "snapshot",
        }
    }

    pub fn into_setup(self) -> Result<PartitionSpec> {
        match self {
            Payload::Setup(spec) => Ok(spec),
            other => Err(unexpected("setup", &other)),
        }
    }

    pub fn into_layer(self) -> Result<BoundaryLayer> {
        match self {
            Payload::Layer(layer) => Ok(layer),
            other => Err(unexpected("layer", &other)),
        }
    }

    pub fn into_snapshot(self) -> Result<GridSnapshot> {
        match self {
            Payload::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected("snapshot", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Payload) -> Error {
    Error::Protocol(format!("expected {} payload, got {}", expected, got.kind()))
}

/// A routed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Rank,
    pub to: Rank,
    pub tag: Tag,
    pub payload: Payload,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
