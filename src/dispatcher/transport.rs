//! TCP router between workers and the controller loop
//!
//! Newline-delimited JSON over TCP. Each accepted connection gets a
//! `WorkerId` of the form `peer_addr#seq`.
//!
//! Task layout:
//! - one accept loop
//! - one reader per connection, forwarding raw lines
//! - N decoder tasks turning lines into [`Inbound`] messages
//! - M writer tasks draining the [`OutboundQueue`]
//!
//! A connection that closes produces a synthesized `disconnect`. Accept
//! failures and undecodable messages trigger the stop signal.

use super::queue::{Inbound, InboundQueue, Outbound, OutboundQueue};
use super::registry::WorkerId;
use crate::error::{DynamoError, ProtocolError, Result, TransportError};
use crate::protocol::WorkerMessage;
use crate::shutdown::Shutdown;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Raw lines buffered between readers and decoders
const FRAME_CHANNEL_CAPACITY: usize = 4096;

type Peers = Arc<RwLock<HashMap<WorkerId, Arc<Mutex<OwnedWriteHalf>>>>>;

/// What a connection reader hands to the decoders
#[derive(Debug)]
enum RawFrame {
    Line { worker: WorkerId, line: String },
    Closed { worker: WorkerId },
}

/// Bound listening socket, not yet accepting
pub struct Router {
    listener: TcpListener,
}

impl Router {
    pub async fn bind(addr: SocketAddr) -> std::result::Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::result::Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed {
                addr: "listener".to_string(),
                reason: e.to_string(),
            })
    }

    /// Spawn the accept loop and the handler pools
    pub fn start(
        self,
        inbound: Arc<InboundQueue>,
        outbound: Arc<OutboundQueue>,
        shutdown: Shutdown,
        inbound_handlers: usize,
        outbound_handlers: usize,
    ) -> RouterHandle {
        let peers: Peers = Arc::new(RwLock::new(HashMap::new()));
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let frames_rx = Arc::new(Mutex::new(frames_rx));
        let mut tasks = JoinSet::new();

        tasks.spawn(accept_loop(
            self.listener,
            Arc::clone(&peers),
            frames_tx,
            shutdown.clone(),
        ));

        for _ in 0..inbound_handlers {
            tasks.spawn(decode_loop(
                Arc::clone(&frames_rx),
                Arc::clone(&inbound),
                shutdown.clone(),
            ));
        }

        for _ in 0..outbound_handlers {
            tasks.spawn(write_loop(
                Arc::clone(&outbound),
                Arc::clone(&peers),
                shutdown.clone(),
            ));
        }

        debug!(inbound_handlers, outbound_handlers, "Router started");
        RouterHandle { tasks }
    }
}

/// Running router tasks
pub struct RouterHandle {
    tasks: JoinSet<Result<()>>,
}

impl RouterHandle {
    /// Wait for every task; the first error wins
    pub async fn join(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(DynamoError::TaskFailed(e.to_string())),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Peers,
    frames: mpsc::Sender<RawFrame>,
    shutdown: Shutdown,
) -> Result<()> {
    let mut seq: u64 = 0;
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Accept failed");
                shutdown.trigger();
                return Err(TransportError::AcceptFailed(e.to_string()).into());
            }
        };

        seq += 1;
        let worker = WorkerId::new(format!("{}#{}", addr, seq));
        if let Err(e) = stream.set_nodelay(true) {
            debug!(worker = %worker, error = %e, "Could not set TCP_NODELAY");
        }

        let (read, write) = stream.into_split();
        peers
            .write()
            .await
            .insert(worker.clone(), Arc::new(Mutex::new(write)));
        info!(worker = %worker, "Connection accepted");

        tokio::spawn(read_connection(
            worker,
            read,
            frames.clone(),
            Arc::clone(&peers),
            shutdown.clone(),
        ));
    }
}

async fn read_connection(
    worker: WorkerId,
    read: OwnedReadHalf,
    frames: mpsc::Sender<RawFrame>,
    peers: Peers,
    shutdown: Shutdown,
) {
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.wait() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let frame = RawFrame::Line {
                    worker: worker.clone(),
                    line,
                };
                if frames.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(worker = %worker, error = %e, "Connection read failed");
                break;
            }
        }
    }

    peers.write().await.remove(&worker);
    debug!(worker = %worker, "Connection closed");
    let _ = frames.send(RawFrame::Closed { worker }).await;
}

async fn decode_loop(
    frames: Arc<Mutex<mpsc::Receiver<RawFrame>>>,
    inbound: Arc<InboundQueue>,
    shutdown: Shutdown,
) -> Result<()> {
    loop {
        let frame = {
            let mut rx = frames.lock().await;
            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                frame = rx.recv() => frame,
            }
        };

        match frame {
            None => return Ok(()),
            Some(RawFrame::Line { worker, line }) => {
                match serde_json::from_str::<WorkerMessage>(&line) {
                    Ok(message) => inbound.push(Inbound::new(worker, message)),
                    Err(e) => {
                        error!(worker = %worker, error = %e, "Malformed message");
                        shutdown.trigger();
                        return Err(ProtocolError::Malformed {
                            peer: worker.to_string(),
                            reason: e.to_string(),
                        }
                        .into());
                    }
                }
            }
            Some(RawFrame::Closed { worker }) => {
                inbound.push(Inbound::new(worker, WorkerMessage::Disconnect));
            }
        }
    }
}

async fn write_loop(outbound: Arc<OutboundQueue>, peers: Peers, shutdown: Shutdown) -> Result<()> {
    loop {
        let Outbound { worker, frame } = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            item = outbound.pop() => item,
        };

        let mut line = match serde_json::to_vec(&frame) {
            Ok(line) => line,
            Err(e) => {
                shutdown.trigger();
                return Err(ProtocolError::from(e).into());
            }
        };
        line.push(b'\n');

        let peer = peers.read().await.get(&worker).cloned();
        let Some(peer) = peer else {
            debug!(worker = %worker, job = %frame.0, "Worker gone, dropping job");
            continue;
        };

        let mut stream = peer.lock().await;
        if let Err(e) = stream.write_all(&line).await {
            let err = TransportError::SendFailed {
                peer: worker.to_string(),
                reason: e.to_string(),
            };
            warn!(worker = %worker, job = %frame.0, error = %err, "Send failed");
        }
    }
}
