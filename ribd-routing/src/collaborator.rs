//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use ribd_utils::{Receiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::{debug, debug_span};

use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::fib::{ArpMsg, AsicMsg, AsicRequest, FibRoute};

// External daemons programming the forwarding plane.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaboratorKind {
    Asic,
    Arp,
}

// Connectivity change reported by a collaborator worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CollaboratorStatus {
    pub kind: CollaboratorKind,
    pub up: bool,
}

// Client side of a connection to an external daemon.
#[async_trait]
pub trait Collaborator<Req>: Send
where
    Req: Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> CollaboratorKind;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<(), IoError>;

    async fn send(&mut self, request: &Req) -> Result<(), IoError>;

    fn disconnect(&mut self);
}

// Collaborator reached over a Unix stream socket carrying newline-delimited
// JSON requests.
#[derive(Debug)]
pub struct SocketClient {
    kind: CollaboratorKind,
    path: PathBuf,
    stream: Option<UnixStream>,
}

// ===== impl CollaboratorKind =====

impl std::fmt::Display for CollaboratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollaboratorKind::Asic => write!(f, "asic"),
            CollaboratorKind::Arp => write!(f, "arp"),
        }
    }
}

// ===== impl SocketClient =====

impl SocketClient {
    pub fn new(kind: CollaboratorKind, path: impl Into<PathBuf>) -> Self {
        SocketClient {
            kind,
            path: path.into(),
            stream: None,
        }
    }
}

#[async_trait]
impl<Req> Collaborator<Req> for SocketClient
where
    Req: Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> CollaboratorKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<(), IoError> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|error| IoError::ConnectError(self.kind, error))?;
        debug_span!("fib").in_scope(|| {
            debug!(
                collaborator = %self.kind,
                path = %self.path.display(),
                "connected"
            );
        });
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, request: &Req) -> Result<(), IoError> {
        let kind = self.kind;
        let mut line =
            serde_json::to_vec(request).map_err(IoError::EncodeError)?;
        line.push(b'\n');

        let Some(stream) = self.stream.as_mut() else {
            let error = std::io::Error::from(std::io::ErrorKind::NotConnected);
            return Err(IoError::SendError(kind, error));
        };
        stream
            .write_all(&line)
            .await
            .map_err(|error| IoError::SendError(kind, error))
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }
}

// ===== global functions =====

// ASIC worker loop.
//
// IPv4 routes flagged for bulk programming are batched until either the batch
// is full, a non-bulk request arrives, or the queue runs dry.
pub async fn asic_worker<C>(
    mut client: C,
    mut asic_rx: Receiver<AsicMsg>,
    status_tx: UnboundedSender<CollaboratorStatus>,
    bulk_size: usize,
    retry_interval: Duration,
) where
    C: Collaborator<AsicRequest>,
{
    let mut retry = tokio::time::interval(retry_interval);
    let mut batch: Vec<FibRoute> = vec![];

    loop {
        tokio::select! {
            msg = asic_rx.recv() => {
                let Some(msg) = msg else {
                    asic_flush(&mut client, &mut batch, &status_tx).await;
                    return;
                };
                match msg {
                    AsicMsg::Add { route, bulk: true } => {
                        batch.push(route);
                        if batch.len() >= bulk_size || asic_rx.is_empty() {
                            asic_flush(&mut client, &mut batch, &status_tx)
                                .await;
                        }
                    }
                    AsicMsg::Add { route, bulk: false } => {
                        asic_flush(&mut client, &mut batch, &status_tx).await;
                        let request = AsicRequest::Add { route };
                        send(&mut client, &request, &status_tx).await;
                    }
                    AsicMsg::Del { route } => {
                        asic_flush(&mut client, &mut batch, &status_tx).await;
                        let request = AsicRequest::Del { route };
                        send(&mut client, &request, &status_tx).await;
                    }
                }
            }
            _ = retry.tick(), if !client.is_connected() => {
                connect::<C, AsicRequest>(&mut client, &status_tx).await;
            }
        }
    }
}

// ARP worker loop.
pub async fn arp_worker<C>(
    mut client: C,
    mut arp_rx: Receiver<ArpMsg>,
    status_tx: UnboundedSender<CollaboratorStatus>,
    retry_interval: Duration,
) where
    C: Collaborator<ArpMsg>,
{
    let mut retry = tokio::time::interval(retry_interval);

    loop {
        tokio::select! {
            msg = arp_rx.recv() => {
                let Some(msg) = msg else {
                    return;
                };
                send(&mut client, &msg, &status_tx).await;
            }
            _ = retry.tick(), if !client.is_connected() => {
                connect::<C, ArpMsg>(&mut client, &status_tx).await;
            }
        }
    }
}

// ===== helper functions =====

async fn asic_flush<C>(
    client: &mut C,
    batch: &mut Vec<FibRoute>,
    status_tx: &UnboundedSender<CollaboratorStatus>,
) where
    C: Collaborator<AsicRequest>,
{
    if batch.is_empty() {
        return;
    }

    Debug::AsicBulkFlush(batch.len()).log();
    let request = AsicRequest::AddBulk {
        routes: std::mem::take(batch),
    };
    send(client, &request, status_tx).await;
}

async fn connect<C, Req>(
    client: &mut C,
    status_tx: &UnboundedSender<CollaboratorStatus>,
) where
    C: Collaborator<Req>,
    Req: Serialize + Send + Sync + 'static,
{
    match client.connect().await {
        Ok(()) => {
            let _ = status_tx.send(CollaboratorStatus {
                kind: client.kind(),
                up: true,
            });
        }
        Err(error) => {
            error.log();
        }
    }
}

async fn send<C, Req>(
    client: &mut C,
    request: &Req,
    status_tx: &UnboundedSender<CollaboratorStatus>,
) where
    C: Collaborator<Req>,
    Req: Serialize + Send + Sync + 'static,
{
    if !client.is_connected() {
        Error::CollaboratorDown(client.kind()).log();
        return;
    }

    if let Err(error) = client.send(request).await {
        error.log();
        client.disconnect();
        let _ = status_tx.send(CollaboratorStatus {
            kind: client.kind(),
            up: false,
        });
    }
}
