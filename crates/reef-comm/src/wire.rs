//! TCP transport: length-prefixed bincode frames over a star topology.
//!
//! Every worker holds one connection to the coordinator, which routes each
//! frame by its destination rank. A worker learns its rank and the run size
//! from its `Setup`. Neighbors may already be sending to it by then, so frames
//! that arrive ahead of the `Setup` are kept for the endpoint.

use crate::endpoint::{Endpoint, Router};
use crate::message::{Envelope, Payload, Tag};
use reef_core::{Error, Rank, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Write one frame: 4-byte big-endian length, then the bincode envelope
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let body = envelope.to_bytes()?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Envelope>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(Error::Transport(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Envelope::from_bytes(&body).map(Some)
}

fn spawn_writer(mut writer: OwnedWriteHalf, mut outgoing: UnboundedReceiver<Envelope>, peer: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = outgoing.recv().await {
            if let Err(e) = write_frame(&mut writer, &envelope).await {
                error!(peer = %peer, error = %e, "Failed to write frame");
                break;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %peer, error = %e, "Connection shutdown failed");
        }
    })
}

/// Background tasks serving a worker's connection
pub struct Connection {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Wait until every queued frame is written, then stop reading.
    ///
    /// The endpoint must be dropped first, otherwise the writer never drains.
    pub async fn close(self) {
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Connection writer task failed");
        }
        self.reader.abort();
    }
}

/// Worker side: connect to the coordinator and wait for the `Setup` frame
pub async fn connect(addr: &str) -> Result<(Endpoint, Connection)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    info!(addr, "Connected to coordinator");

    let (mut reader, writer) = stream.into_split();
    let (setup, early) = await_setup(&mut reader).await?;
    let rank = setup.to;
    let size = match &setup.payload {
        Payload::Setup(spec) => spec.workers + 1,
        other => {
            return Err(Error::Protocol(format!(
                "setup frame carried a {} payload",
                other.kind()
            )))
        }
    };
    info!(rank = %rank, size, early_frames = early.len(), "Assigned rank");

    let (upstream_tx, upstream_rx) = unbounded_channel();
    let (inbound_tx, inbound_rx) = unbounded_channel();

    let writer = spawn_writer(writer, upstream_rx, addr.to_string());
    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(envelope)) => {
                    if inbound_tx.send(envelope).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Coordinator closed the connection");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read frame from coordinator");
                    break;
                }
            }
        }
    });

    let mut endpoint = Endpoint::relay(rank, size, upstream_tx, inbound_rx);
    endpoint.push_pending(setup);
    for envelope in early {
        endpoint.push_pending(envelope);
    }

    Ok((endpoint, Connection { writer, reader }))
}

/// Read until the coordinator's `Setup` shows up, keeping whatever came first
async fn await_setup<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(Envelope, Vec<Envelope>)> {
    let mut early = Vec::new();
    loop {
        let envelope = read_frame(reader)
            .await?
            .ok_or_else(|| Error::Protocol("coordinator closed before setup".to_string()))?;
        if envelope.tag == Tag::Setup && envelope.from == Rank::COORDINATOR {
            return Ok((envelope, early));
        }
        debug!(from = %envelope.from, tag = ?envelope.tag, "Holding frame until setup arrives");
        early.push(envelope);
    }
}

/// Coordinator side: accept `workers` connections, assigning ranks in accept order.
///
/// Each connection gets a writer fed through `router` and a reader that routes
/// incoming frames by destination. Returned handles finish when a worker
/// disconnects.
pub async fn accept_workers(listener: &TcpListener, router: &Router, workers: u32) -> Result<Vec<JoinHandle<()>>> {
    let mut readers = Vec::with_capacity(workers as usize);

    for rank in (1..=workers).map(Rank) {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(peer = %peer, rank = %rank, "Worker connected");

        let (reader, writer) = stream.into_split();
        let (tx, rx) = unbounded_channel();
        router.attach_sender(rank, tx);
        spawn_writer(writer, rx, peer.to_string());

        readers.push(tokio::spawn(route_frames(reader, router.clone(), rank)));
    }

    Ok(readers)
}

async fn route_frames(mut reader: OwnedReadHalf, router: Router, rank: Rank) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(envelope)) if envelope.from != rank => {
                warn!(
                    rank = %rank,
                    claimed = %envelope.from,
                    "Dropping frame claiming another rank"
                );
            }
            Ok(Some(envelope)) => {
                if let Err(e) = router.deliver(envelope) {
                    warn!(rank = %rank, error = %e, "Undeliverable frame");
                }
            }
            Ok(None) => {
                info!(rank = %rank, "Worker disconnected");
                break;
            }
            Err(e) => {
                error!(rank = %rank, error = %e, "Failed to read frame");
                break;
            }
        }
    }
    router.detach(rank);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use reef_core::{BoundaryLayer, Coord, Creature, PartitionSpec};

    fn setup_for(rank: u32, workers: u32) -> Payload {
        Payload::Setup(PartitionSpec {
            rank: Rank(rank),
            workers,
            length: 2,
            own_width: 2,
            height: 2,
            y_offset: 0,
            fish: 1,
            sharks: 0,
            generations: 1,
            seed: Some(1),
        })
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let envelope = Envelope {
            from: Rank(2),
            to: Rank(1),
            tag: Tag::Halo,
            payload: Payload::Layer(BoundaryLayer::empty(3, 2)),
        };

        write_frame(&mut client, &envelope).await.unwrap();
        drop(client);

        let decoded = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decoded.from, Rank(2));
        assert_eq!(decoded.tag, Tag::Halo);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workers_talk_through_coordinator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let router = Router::new();
        let mut coordinator = Endpoint::direct(Rank::COORDINATOR, 3, &router);

        let clients: Vec<_> = (0..2)
            .map(|_| {
                let addr = addr.clone();
                tokio::spawn(async move { connect(&addr).await.unwrap() })
            })
            .collect();
        let readers = accept_workers(&listener, &router, 2).await.unwrap();
        assert_eq!(readers.len(), 2);
        for rank in 1..=2 {
            coordinator.send(Rank(rank), Tag::Setup, setup_for(rank, 2)).unwrap();
        }

        let mut endpoints = Vec::new();
        for client in clients {
            endpoints.push(client.await.unwrap());
        }
        endpoints.sort_by_key(|(endpoint, _)| endpoint.rank());
        let (mut second, second_conn) = endpoints.pop().unwrap();
        let (mut first, first_conn) = endpoints.pop().unwrap();
        assert_eq!(first.rank(), Rank(1));
        assert_eq!(second.size(), 3);

        let received = tokio::task::spawn_blocking(move || {
            first.recv(Rank::COORDINATOR, Tag::Setup).unwrap();
            second.recv(Rank::COORDINATOR, Tag::Setup).unwrap();
            first
                .send(Rank(2), Tag::Halo, Payload::Layer(BoundaryLayer::empty(5, 1)))
                .unwrap();
            second
                .send(Rank::COORDINATOR, Tag::Gather, Payload::Layer(BoundaryLayer::empty(7, 1)))
                .unwrap();
            let halo = second.recv(Rank(1), Tag::Halo).unwrap().into_layer().unwrap();
            let gathered = coordinator.recv(Rank(2), Tag::Gather).unwrap().into_layer().unwrap();
            (halo.length, gathered.length)
        })
        .await
        .unwrap();

        assert_eq!(received, (5, 7));
        first_conn.close().await;
        second_conn.close().await;
    }

    #[tokio::test]
    async fn test_neighbor_frame_ahead_of_setup_is_kept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // the upper neighbor was set up first and its halo overtook our setup
        let coordinator = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut layer = BoundaryLayer::empty(2, 2);
            layer.set(1, 0, Some(Creature::fish(Coord::new(1, 2, 0))));
            let halo = Envelope {
                from: Rank(1),
                to: Rank(2),
                tag: Tag::Halo,
                payload: Payload::Layer(layer),
            };
            write_frame(&mut stream, &halo).await.unwrap();
            let setup = Envelope {
                from: Rank::COORDINATOR,
                to: Rank(2),
                tag: Tag::Setup,
                payload: setup_for(2, 2),
            };
            write_frame(&mut stream, &setup).await.unwrap();
            stream
        });

        let (mut endpoint, connection) = connect(&addr).await.unwrap();
        assert_eq!(endpoint.rank(), Rank(2));
        assert_eq!(endpoint.size(), 3);

        let (spec, halo) = tokio::task::spawn_blocking(move || {
            let spec = endpoint.recv(Rank::COORDINATOR, Tag::Setup).unwrap();
            let halo = endpoint.recv(Rank(1), Tag::Halo).unwrap();
            (spec, halo)
        })
        .await
        .unwrap();
        assert!(matches!(spec, Payload::Setup(ref s) if s.rank == Rank(2)));
        let layer = halo.into_layer().unwrap();
        assert!(layer.get(1, 0).is_some());
        assert!(layer.get(0, 0).is_none());

        connection.close().await;
        drop(coordinator.await.unwrap());
    }

    #[tokio::test]
    async fn test_coordinator_hanging_up_before_setup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let coordinator = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let result = connect(&addr).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        coordinator.await.unwrap();
    }
}
