//! WebSocket transport between the coordinator and worker processes
//!
//! The coordinator runs CoordinatorServer, workers connect with MirrorClient.
//! Every frame is a JSON-encoded StateMessage.

use crate::authority::AuthorityHandle;
use crate::channel::{Upstream, WorkerLink};
use crate::error::SyncError;
use crate::mirror::StateMirror;
use crate::types::{StateMessage, WorkerId};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

/// Book-keeping for one worker connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_addr: SocketAddr,
    pub connected_at: i64,
    pub frames_received: u64,
}

/// Live worker connections, keyed by the id the authority assigned
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<WorkerId, ConnectionInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, worker_id: WorkerId, peer_addr: SocketAddr) {
        self.connections.insert(
            worker_id,
            ConnectionInfo {
                peer_addr,
                connected_at: chrono::Utc::now().timestamp(),
                frames_received: 0,
            },
        );
    }

    pub fn unregister(&self, worker_id: WorkerId) -> bool {
        self.connections.remove(&worker_id).is_some()
    }

    pub fn record_frame(&self, worker_id: WorkerId) {
        if let Some(mut info) = self.connections.get_mut(&worker_id) {
            info.frames_received += 1;
        }
    }

    pub fn get(&self, worker_id: WorkerId) -> Option<ConnectionInfo> {
        self.connections.get(&worker_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// WebSocket server run by the coordinator
pub struct CoordinatorServer {
    authority: AuthorityHandle,
    connections: Arc<ConnectionRegistry>,
}

impl CoordinatorServer {
    pub fn new(authority: AuthorityHandle) -> Self {
        Self {
            authority,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Start accepting worker connections. Returns the bound address.
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Coordinator listening on {}", local_addr);

        let authority = self.authority.clone();
        let connections = self.connections.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Worker connecting from {}", peer_addr);
                        let authority = authority.clone();
                        let connections = connections.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_worker_connection(stream, peer_addr, authority, connections)
                                    .await
                            {
                                tracing::warn!("Worker connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Number of connected workers
    pub fn connected_workers(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        self.connections.clone()
    }
}

async fn handle_worker_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    authority: AuthorityHandle,
    connections: Arc<ConnectionRegistry>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let worker_id = authority.next_worker_id();
    let (link, mut outbound) = WorkerLink::channel(worker_id);
    authority.attach_link(link)?;
    connections.register(worker_id, peer_addr);

    // Forward authority broadcasts to this worker
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode message for {}: {}", worker_id, e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Hand incoming frames to the authority, undecoded
    while let Some(msg) = ws_receiver.next().await {
        let frame = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", worker_id, e);
                break;
            }
            _ => continue,
        };

        connections.record_frame(worker_id);
        if let Err(e) = authority.submit_frame(worker_id, frame) {
            tracing::warn!("Dropping frame from {}: {}", worker_id, e);
            break;
        }
    }

    send_task.abort();
    connections.unregister(worker_id);
    if let Err(e) = authority.detach(worker_id) {
        tracing::debug!("Detach of {} not delivered: {}", worker_id, e);
    }
    tracing::info!("{} disconnected ({})", worker_id, peer_addr);

    Ok(())
}

/// Upstream that writes requests to the coordinator socket
#[derive(Debug, Clone)]
pub struct RemoteUpstream {
    tx: mpsc::UnboundedSender<StateMessage>,
}

impl Upstream for RemoteUpstream {
    fn send(&self, message: StateMessage) -> Result<(), SyncError> {
        self.tx
            .send(message)
            .map_err(|_| SyncError::ChannelUnavailable("coordinator connection closed".to_string()))
    }
}

/// Worker-side connection to the coordinator
pub struct MirrorClient {
    mirror: Arc<StateMirror>,
    recv_task: JoinHandle<()>,
}

impl MirrorClient {
    /// Connect to the coordinator and start mirroring its list
    pub async fn connect(coordinator_addr: &str) -> anyhow::Result<Self> {
        let url = format!("ws://{}", coordinator_addr);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        tracing::info!("Connected to coordinator at {}", coordinator_addr);

        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<StateMessage>();
        let mirror = Arc::new(StateMirror::new());
        mirror.attach(RemoteUpstream { tx: msg_tx });

        // Spawn receiver task
        let recv_mirror = mirror.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => recv_mirror.on_frame(text.as_bytes()),
                    Ok(Message::Binary(data)) => recv_mirror.on_frame(&data),
                    Ok(Message::Close(_)) => {
                        tracing::warn!("Coordinator closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Spawn sender task
        tokio::spawn(async move {
            while let Some(message) = msg_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to encode request: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self { mirror, recv_task })
    }

    /// The mirror fed by this connection
    pub fn mirror(&self) -> Arc<StateMirror> {
        self.mirror.clone()
    }

    /// Wait until the coordinator connection is gone
    pub async fn closed(self) {
        if let Err(e) = self.recv_task.await {
            tracing::debug!("Receive task ended abnormally: {}", e);
        }
    }
}
