//! Channel-backed endpoints and the routing table that connects them.

use crate::message::{Envelope, Payload, Tag};
use crate::transport::Transport;
use dashmap::DashMap;
use reef_core::{Error, Rank, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// Maps each rank to the channel feeding its inbox
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<DashMap<Rank, UnboundedSender<Envelope>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inbox for `rank` and return its receiving side
    pub fn attach(&self, rank: Rank) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = unbounded_channel();
        self.attach_sender(rank, tx);
        rx
    }

    /// Route `rank` to an existing channel, e.g. a socket writer
    pub fn attach_sender(&self, rank: Rank, sender: UnboundedSender<Envelope>) {
        self.routes.insert(rank, sender);
    }

    pub fn detach(&self, rank: Rank) {
        self.routes.remove(&rank);
    }

    /// Drop every route, so each inbox closes once drained
    pub fn close_all(&self) {
        self.routes.clear();
    }

    /// Guard that closes every route when dropped, unless disarmed first.
    ///
    /// A rank that fails or unwinds while its peers sit in a blocking
    /// receive would otherwise leave them waiting forever.
    pub fn close_on_drop(&self) -> RouteGuard {
        RouteGuard {
            router: self.clone(),
            armed: true,
        }
    }

    pub fn is_attached(&self, rank: Rank) -> bool {
        self.routes.contains_key(&rank)
    }

    pub fn deliver(&self, envelope: Envelope) -> Result<()> {
        let sender = self
            .routes
            .get(&envelope.to)
            .map(|route| route.value().clone())
            .ok_or_else(|| Error::Transport(format!("no route to rank {}", envelope.to)))?;

        let to = envelope.to;
        sender
            .send(envelope)
            .map_err(|_| Error::Transport(format!("rank {} is no longer receiving", to)))
    }
}

/// See [`Router::close_on_drop`]
pub struct RouteGuard {
    router: Router,
    armed: bool,
}

impl RouteGuard {
    /// Leave the routes open
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        if self.armed {
            trace!("Closing every route");
            self.router.close_all();
        }
    }
}

enum Outbound {
    /// Deliver straight into the destination inbox
    Direct(Router),
    /// Hand everything to one upstream channel that routes further
    Relay(UnboundedSender<Envelope>),
}

/// One rank's view of the message substrate
pub struct Endpoint {
    rank: Rank,
    size: u32,
    outbound: Outbound,
    inbound: UnboundedReceiver<Envelope>,
    pending: VecDeque<Envelope>,
}

impl Endpoint {
    /// Endpoint whose sends go through `router`; attaches its own inbox
    pub fn direct(rank: Rank, size: u32, router: &Router) -> Self {
        let inbound = router.attach(rank);
        Self {
            rank,
            size,
            outbound: Outbound::Direct(router.clone()),
            inbound,
            pending: VecDeque::new(),
        }
    }

    /// Endpoint whose sends are all forwarded to `upstream`
    pub fn relay(
        rank: Rank,
        size: u32,
        upstream: UnboundedSender<Envelope>,
        inbound: UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            rank,
            size,
            outbound: Outbound::Relay(upstream),
            inbound,
            pending: VecDeque::new(),
        }
    }

    /// Queue a message that was read before the endpoint existed
    pub fn push_pending(&mut self, envelope: Envelope) {
        self.pending.push_back(envelope);
    }

    fn take_pending(&mut self, from: Rank, tag: Tag) -> Option<Envelope> {
        let position = self
            .pending
            .iter()
            .position(|e| e.from == from && e.tag == tag)?;
        self.pending.remove(position)
    }
}

impl Transport for Endpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn send(&self, to: Rank, tag: Tag, payload: Payload) -> Result<()> {
        trace!(from = %self.rank, to = %to, ?tag, kind = payload.kind(), "send");
        let envelope = Envelope {
            from: self.rank,
            to,
            tag,
            payload,
        };
        match &self.outbound {
            Outbound::Direct(router) => router.deliver(envelope),
            Outbound::Relay(upstream) => upstream
                .send(envelope)
                .map_err(|_| Error::Transport("upstream connection closed".to_string())),
        }
    }

    fn recv(&mut self, from: Rank, tag: Tag) -> Result<Payload> {
        if let Some(envelope) = self.take_pending(from, tag) {
            return Ok(envelope.payload);
        }

        loop {
            let envelope = self.inbound.blocking_recv().ok_or_else(|| {
                Error::Transport(format!(
                    "rank {} inbox closed while waiting for {:?} from rank {}",
                    self.rank, tag, from
                ))
            })?;

            if envelope.from == from && envelope.tag == tag {
                trace!(rank = %self.rank, from = %from, ?tag, "recv");
                return Ok(envelope.payload);
            }
            self.pending.push_back(envelope);
        }
    }
}

/// In-process endpoints for ranks `0..size`, all sharing one router
pub fn local_mesh(size: u32) -> Vec<Endpoint> {
    local_mesh_on(&Router::new(), size)
}

/// Like [`local_mesh`], attached to a router the caller keeps
pub fn local_mesh_on(router: &Router, size: u32) -> Vec<Endpoint> {
    (0..size)
        .map(|rank| Endpoint::direct(Rank(rank), size, router))
        .collect()
}
