//! Message-passing substrate between the coordinator and worker ranks.
//!
//! Ranks talk through blocking point-to-point [`Transport`] calls. Messages are
//! reliable and FIFO per `(source, tag)`. Endpoints are backed by tokio channels
//! and can be wired either in-process ([`local_mesh`]) or over TCP ([`wire`]).

pub mod message;
pub mod transport;
pub mod endpoint;
pub mod wire;

pub use message::{Envelope, Payload, Tag};
pub use transport::Transport;
pub use endpoint::{local_mesh, local_mesh_on, Endpoint, RouteGuard, Router};
