//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_utils::ibus::{IbusMsg, IbusSubscriber, Notification};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::Nexthop;
use ribd_utils::{Database, Receiver, Responder, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::collaborator::CollaboratorKind;
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::rib::{Route, RouteFlags, RouteState};

// Ordered hand-off of RIB decisions to the collaborator workers.
//
// Requests are queued while a RIB mutation is being processed and sent once
// it completes, preserving their relative order.
#[derive(Debug)]
pub struct FibDispatch {
    asic_tx: Sender<AsicMsg>,
    arp_tx: Sender<ArpMsg>,
    db_tx: Sender<DbMsg>,
    notify_tx: Sender<NotifyMsg>,
    // Collaborator connectivity.
    pub asic_up: bool,
    pub arp_up: bool,
    // Whether IPv4 route additions should be programmed in bulk.
    pub bulk: bool,
    pending: VecDeque<FibOp>,
}

// Receiving ends of the collaborator queues.
#[derive(Debug)]
pub struct FibReceivers {
    pub asic: Receiver<AsicMsg>,
    pub arp: Receiver<ArpMsg>,
    pub db: Receiver<DbMsg>,
    pub notify: Receiver<NotifyMsg>,
}

#[derive(Debug)]
enum FibOp {
    Asic(AsicMsg),
    Arp(ArpMsg),
    Db(DbMsg),
    Notify(NotifyMsg),
}

// Route as programmed into the forwarding plane.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FibRoute {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub nexthop: Nexthop,
    pub null_route: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AsicMsg {
    Add { route: FibRoute, bulk: bool },
    Del { route: FibRoute },
}

// Request sent to the ASIC daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum AsicRequest {
    Add { route: FibRoute },
    AddBulk { routes: Vec<FibRoute> },
    Del { route: FibRoute },
}

// Request sent to the ARP daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ArpMsg {
    Add { addr: IpAddr, ifindex: u32 },
    Del { addr: IpAddr, ifindex: u32 },
}

#[derive(Debug)]
pub enum DbMsg {
    Update(RouteState),
    Delete(String),
    ReadAll(Responder<Vec<RouteState>>),
}

#[derive(Debug)]
pub enum NotifyMsg {
    Subscribe {
        protocol: Protocol,
        subscriber: IbusSubscriber,
    },
    Unsubscribe(usize),
    Publish {
        target: NotifyTarget,
        msg: IbusMsg,
    },
    // Starts delivering notifications to subscribers.
    Activate,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifyTarget {
    Protocol(Protocol),
    All,
}

// ===== impl FibDispatch =====

impl FibDispatch {
    pub fn new(
        asic_tx: Sender<AsicMsg>,
        arp_tx: Sender<ArpMsg>,
        db_tx: Sender<DbMsg>,
        notify_tx: Sender<NotifyMsg>,
    ) -> FibDispatch {
        FibDispatch {
            asic_tx,
            arp_tx,
            db_tx,
            notify_tx,
            asic_up: false,
            arp_up: false,
            bulk: false,
            pending: Default::default(),
        }
    }

    // Creates a dispatcher along with the receiving ends of its queues.
    pub fn channels(size: usize) -> (FibDispatch, FibReceivers) {
        let (asic_tx, asic_rx) = mpsc::channel(size);
        let (arp_tx, arp_rx) = mpsc::channel(size);
        let (db_tx, db_rx) = mpsc::channel(size);
        let (notify_tx, notify_rx) = mpsc::channel(size);
        let fib = FibDispatch::new(asic_tx, arp_tx, db_tx, notify_tx);
        let receivers = FibReceivers {
            asic: asic_rx,
            arp: arp_rx,
            db: db_rx,
            notify: notify_rx,
        };
        (fib, receivers)
    }

    // Updates the connectivity of a collaborator.
    //
    // Returns true when the collaborator came up.
    pub fn set_status(&mut self, kind: CollaboratorKind, up: bool) -> bool {
        Debug::CollaboratorStatus(kind, up).log();
        let status = match kind {
            CollaboratorKind::Asic => &mut self.asic_up,
            CollaboratorKind::Arp => &mut self.arp_up,
        };
        let came_up = up && !*status;
        *status = up;
        came_up
    }

    pub fn route_install(&mut self, route: &Route) {
        Debug::RouteInstall(&route.prefix, route.protocol, &route.nexthop)
            .log();
        let bulk = self.bulk && route.prefix.is_ipv4();
        self.asic_add(fib_route(route), bulk);
    }

    pub fn route_uninstall(&mut self, route: &Route) {
        Debug::RouteUninstall(&route.prefix, route.protocol, &route.nexthop)
            .log();
        if !self.asic_up {
            Error::CollaboratorDown(CollaboratorKind::Asic).log();
            return;
        }
        let route = fib_route(route);
        self.pending.push_back(FibOp::Asic(AsicMsg::Del { route }));
    }

    // Programs the given routes again, IPv4 ones in bulk.
    pub fn resync(&mut self, routes: &[Route]) {
        for route in routes {
            self.asic_add(fib_route(route), route.prefix.is_ipv4());
        }
    }

    fn asic_add(&mut self, route: FibRoute, bulk: bool) {
        if !self.asic_up {
            Error::CollaboratorDown(CollaboratorKind::Asic).log();
            return;
        }
        self.pending
            .push_back(FibOp::Asic(AsicMsg::Add { route, bulk }));
    }

    pub fn arp_resolve(&mut self, addr: IpAddr, ifindex: u32) {
        if !self.arp_up {
            Error::CollaboratorDown(CollaboratorKind::Arp).log();
            return;
        }
        self.pending
            .push_back(FibOp::Arp(ArpMsg::Add { addr, ifindex }));
    }

    pub fn arp_release(&mut self, addr: IpAddr, ifindex: u32) {
        if !self.arp_up {
            Error::CollaboratorDown(CollaboratorKind::Arp).log();
            return;
        }
        self.pending
            .push_back(FibOp::Arp(ArpMsg::Del { addr, ifindex }));
    }

    pub fn db_update(&mut self, state: RouteState) {
        self.pending.push_back(FibOp::Db(DbMsg::Update(state)));
    }

    pub fn db_delete(&mut self, key: String) {
        self.pending.push_back(FibOp::Db(DbMsg::Delete(key)));
    }

    pub fn notify(&mut self, target: NotifyTarget, msg: IbusMsg) {
        self.pending
            .push_back(FibOp::Notify(NotifyMsg::Publish { target, msg }));
    }

    pub fn subscribe(
        &mut self,
        protocol: Protocol,
        subscriber: IbusSubscriber,
    ) {
        self.pending.push_back(FibOp::Notify(NotifyMsg::Subscribe {
            protocol,
            subscriber,
        }));
    }

    pub fn unsubscribe(&mut self, id: usize) {
        self.pending
            .push_back(FibOp::Notify(NotifyMsg::Unsubscribe(id)));
    }

    pub fn activate(&mut self) {
        self.pending.push_back(FibOp::Notify(NotifyMsg::Activate));
    }

    // Requests the full database contents.
    pub async fn db_read_all(&self) -> Result<Vec<RouteState>, Error> {
        let (responder, rx) = tokio::sync::oneshot::channel();
        self.db_tx
            .send(DbMsg::ReadAll(responder))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    // Sends all queued requests to their workers.
    //
    // A full queue blocks until the corresponding worker catches up.
    pub async fn flush(&mut self) {
        while let Some(op) = self.pending.pop_front() {
            let result = match op {
                FibOp::Asic(msg) => self.asic_tx.send(msg).await.is_ok(),
                FibOp::Arp(msg) => self.arp_tx.send(msg).await.is_ok(),
                FibOp::Db(msg) => self.db_tx.send(msg).await.is_ok(),
                FibOp::Notify(msg) => self.notify_tx.send(msg).await.is_ok(),
            };
            if !result {
                Error::ChannelClosed.log();
            }
        }
    }
}

// ===== impl NotifyTarget =====

impl NotifyTarget {
    fn matches(&self, protocol: Protocol) -> bool {
        match self {
            NotifyTarget::Protocol(target) => *target == protocol,
            NotifyTarget::All => true,
        }
    }
}

// ===== global functions =====

// Database worker loop.
//
// pickledb dumps the whole database to disk on every write, so each request
// runs on the blocking thread pool. Requests are still handled one at a time,
// in order.
pub async fn db_worker(db: Database, mut db_rx: Receiver<DbMsg>) {
    while let Some(msg) = db_rx.recv().await {
        let db = db.clone();
        let result =
            tokio::task::spawn_blocking(move || db_process(&db, msg)).await;
        if let Err(error) = result {
            IoError::DatabaseTask(error).log();
        }
    }
}

fn db_process(db: &Database, msg: DbMsg) {
    match msg {
        DbMsg::Update(state) => {
            let mut db = db.lock().unwrap();
            if let Err(error) = db.set(&state.db_key(), &state) {
                IoError::DatabaseError(error).log();
            }
        }
        DbMsg::Delete(key) => {
            let mut db = db.lock().unwrap();
            if let Err(error) = db.rem(&key) {
                IoError::DatabaseError(error).log();
            }
        }
        DbMsg::ReadAll(responder) => {
            let states = {
                let db = db.lock().unwrap();
                db.get_all()
                    .iter()
                    .filter_map(|key| db.get::<RouteState>(key))
                    .collect::<Vec<_>>()
            };
            let _ = responder.send(states);
        }
    }
}

// Notification worker loop.
//
// Notifications published before activation are held back and delivered in
// order once the worker is activated.
pub async fn notify_worker(mut notify_rx: Receiver<NotifyMsg>) {
    let mut subscribers: BTreeMap<usize, (Protocol, IbusSubscriber)> =
        Default::default();
    let mut backlog = vec![];
    let mut active = false;

    while let Some(msg) = notify_rx.recv().await {
        match msg {
            NotifyMsg::Subscribe {
                protocol,
                subscriber,
            } => {
                subscribers.insert(subscriber.id, (protocol, subscriber));
            }
            NotifyMsg::Unsubscribe(id) => {
                subscribers.remove(&id);
            }
            NotifyMsg::Publish { target, msg } => {
                if active {
                    publish(&mut subscribers, target, &msg);
                } else {
                    backlog.push((target, msg));
                }
            }
            NotifyMsg::Activate => {
                active = true;
                for (target, msg) in backlog.drain(..) {
                    publish(&mut subscribers, target, &msg);
                }
            }
        }
    }
}

// ===== helper functions =====

fn fib_route(route: &Route) -> FibRoute {
    FibRoute {
        prefix: route.prefix,
        protocol: route.protocol,
        nexthop: route.fib_nexthop(),
        null_route: route.flags.contains(RouteFlags::NULL),
    }
}

fn publish(
    subscribers: &mut BTreeMap<usize, (Protocol, IbusSubscriber)>,
    target: NotifyTarget,
    msg: &IbusMsg,
) {
    let notification: Notification = match msg.encode() {
        Ok(notification) => notification,
        Err(error) => {
            IoError::EncodeError(error).log();
            return;
        }
    };

    // Drop subscribers that went away.
    subscribers.retain(|_, (protocol, subscriber)| {
        !target.matches(*protocol)
            || subscriber.tx.send(notification.clone()).is_ok()
    });
}
