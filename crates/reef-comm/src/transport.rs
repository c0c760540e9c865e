//! The point-to-point contract the simulation core is written against.

use crate::message::{Payload, Tag};
use reef_core::{Rank, Result};

/// Blocking, reliable, ordered point-to-point messaging between ranks.
///
/// `recv` blocks until a message from `from` with `tag` arrives; messages for
/// other `(source, tag)` pairs that show up first are kept for later calls.
/// There is no timeout: a peer that never sends stalls the caller.
pub trait Transport {
    /// Rank of this endpoint
    fn rank(&self) -> Rank;

    /// Number of ranks in the run, coordinator included
    fn size(&self) -> u32;

    fn send(&self, to: Rank, tag: Tag, payload: Payload) -> Result<()>;

    fn recv(&mut self, from: Rank, tag: Tag) -> Result<Payload>;

    /// Number of worker ranks
    fn workers(&self) -> u32 {
        self.size().saturating_sub(1)
    }
}
