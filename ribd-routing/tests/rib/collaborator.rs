//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use ribd_routing::collaborator::{
    Collaborator, CollaboratorKind, CollaboratorStatus, arp_worker,
    asic_worker,
};
use ribd_routing::error::IoError;
use ribd_routing::fib::{
    self, ArpMsg, AsicRequest, DbMsg, FibRoute, NotifyTarget,
};
use ribd_routing::rib::{ResolvedNexthop, RouteFlags, RouteState};
use ribd_utils::Database;
use ribd_utils::ibus::{IbusMsg, subscriber_channel};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::Nexthop;
use serde::Serialize;
use tokio::sync::mpsc;

use super::*;

// Collaborator recording the requests it receives.
#[derive(Debug)]
struct MockClient<Req> {
    kind: CollaboratorKind,
    state: Arc<Mutex<MockState<Req>>>,
}

#[derive(Debug)]
struct MockState<Req> {
    connected: bool,
    fail: bool,
    requests: Vec<Req>,
}

#[async_trait]
impl<Req> Collaborator<Req> for MockClient<Req>
where
    Req: Clone + Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> CollaboratorKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn connect(&mut self) -> Result<(), IoError> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn send(&mut self, request: &Req) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            let error = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
            return Err(IoError::SendError(self.kind, error));
        }
        state.requests.push(request.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.lock().unwrap().connected = false;
    }
}

//
// Helper functions.
//

fn mock<Req>(
    kind: CollaboratorKind,
    connected: bool,
    fail: bool,
) -> (MockClient<Req>, Arc<Mutex<MockState<Req>>>) {
    let state = Arc::new(Mutex::new(MockState {
        connected,
        fail,
        requests: vec![],
    }));
    let client = MockClient {
        kind,
        state: state.clone(),
    };
    (client, state)
}

fn fib_route(destination: &str) -> FibRoute {
    FibRoute {
        prefix: net(destination),
        protocol: Protocol::OSPF,
        nexthop: Nexthop {
            addr: ip("33.1.10.2"),
            ifindex: 2,
            weight: 1,
        },
        null_route: false,
    }
}

fn database() -> Database {
    let db = PickleDb::new(
        "/tmp/ribd-test.db",
        PickleDbDumpPolicy::NeverDump,
        SerializationMethod::Json,
    );
    Arc::new(Mutex::new(db))
}

fn route_state(destination: &str, protocol: Protocol) -> RouteState {
    let now = Utc::now();
    RouteState {
        protocol,
        prefix: net(destination),
        nexthop: ip("33.1.10.2"),
        ifindex: 0,
        metric: 10,
        weight: 1,
        distance: 110,
        resolved: ResolvedNexthop::new(ip("33.1.10.2"), 2, true),
        selected: true,
        flags: RouteFlags::INSTALLED,
        created: now,
        updated: now,
    }
}

//
// Tests.
//

#[tokio::test]
async fn test_asic_bulk_batching() {
    let (client, state) = mock(CollaboratorKind::Asic, true, false);
    let (asic_tx, asic_rx) = mpsc::channel(16);
    let (status_tx, _status_rx) = mpsc::unbounded_channel();

    let prefixes = (0..5)
        .map(|i| format!("50.0.{}.0/24", i))
        .collect::<Vec<_>>();
    for prefix in &prefixes {
        let route = fib_route(prefix);
        asic_tx.send(AsicMsg::Add { route, bulk: true }).await.unwrap();
    }
    let route = fib_route(&prefixes[0]);
    asic_tx.send(AsicMsg::Del { route }).await.unwrap();
    drop(asic_tx);

    asic_worker(client, asic_rx, status_tx, 2, Duration::from_secs(1)).await;

    let requests = state.lock().unwrap().requests.clone();
    let batch = |range: std::ops::Range<usize>| AsicRequest::AddBulk {
        routes: prefixes[range].iter().map(|p| fib_route(p)).collect(),
    };
    assert_eq!(
        requests,
        vec![
            batch(0..2),
            batch(2..4),
            batch(4..5),
            AsicRequest::Del {
                route: fib_route(&prefixes[0])
            },
        ]
    );
}

#[tokio::test]
async fn test_asic_single_add_flushes_batch() {
    let (client, state) = mock(CollaboratorKind::Asic, true, false);
    let (asic_tx, asic_rx) = mpsc::channel(16);
    let (status_tx, _status_rx) = mpsc::unbounded_channel();

    let route = fib_route("50.0.0.0/24");
    asic_tx.send(AsicMsg::Add { route, bulk: true }).await.unwrap();
    let route = fib_route("2001:db8::/64");
    asic_tx.send(AsicMsg::Add { route, bulk: false }).await.unwrap();
    drop(asic_tx);

    asic_worker(client, asic_rx, status_tx, 100, Duration::from_secs(1)).await;

    let requests = state.lock().unwrap().requests.clone();
    assert_eq!(
        requests,
        vec![
            AsicRequest::AddBulk {
                routes: vec![fib_route("50.0.0.0/24")]
            },
            AsicRequest::Add {
                route: fib_route("2001:db8::/64")
            },
        ]
    );
}

#[tokio::test]
async fn test_arp_connect() {
    let (client, state) = mock(CollaboratorKind::Arp, false, false);
    let (arp_tx, arp_rx) = mpsc::channel(16);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(arp_worker(
        client,
        arp_rx,
        status_tx,
        Duration::from_millis(10),
    ));

    // The worker reports the connection once established.
    assert_eq!(
        status_rx.recv().await,
        Some(CollaboratorStatus {
            kind: CollaboratorKind::Arp,
            up: true,
        })
    );

    let msg = ArpMsg::Add {
        addr: ip("33.1.10.2"),
        ifindex: 2,
    };
    arp_tx.send(msg.clone()).await.unwrap();
    drop(arp_tx);
    worker.await.unwrap();
    assert_eq!(state.lock().unwrap().requests, vec![msg]);
}

#[tokio::test]
async fn test_send_failure() {
    let (client, state) = mock(CollaboratorKind::Asic, true, true);
    let (asic_tx, asic_rx) = mpsc::channel(16);
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();

    let route = fib_route("50.0.0.0/24");
    asic_tx.send(AsicMsg::Del { route }).await.unwrap();
    drop(asic_tx);
    asic_worker(client, asic_rx, status_tx, 2, Duration::from_secs(1)).await;

    assert!(state.lock().unwrap().requests.is_empty());
    assert_eq!(
        status_rx.recv().await,
        Some(CollaboratorStatus {
            kind: CollaboratorKind::Asic,
            up: false,
        })
    );
}

#[tokio::test]
async fn test_collaborator_resync() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;
    let stat = route("static", "50.0.0.0", "255.255.255.0", &["33.1.10.2"], 0);
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    asic_msgs(&mut rx);

    // Nothing is sent while the ASIC daemon is down.
    let status = CollaboratorStatus {
        kind: CollaboratorKind::Asic,
        up: false,
    };
    master.process_status(status).await;
    let stat = route("static", "51.0.0.0", "255.255.255.0", &["33.1.10.2"], 0);
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    assert!(asic_msgs(&mut rx).is_empty());

    // Once it's back, every installed route is programmed again.
    let status = CollaboratorStatus {
        kind: CollaboratorKind::Asic,
        up: true,
    };
    master.process_status(status).await;
    let msgs = asic_msgs(&mut rx);
    assert_eq!(msgs.len(), 4);
    assert!(
        msgs.iter()
            .all(|msg| matches!(msg, AsicMsg::Add { bulk: true, .. }))
    );
}

#[tokio::test]
async fn test_notify_worker() {
    let (notify_tx, notify_rx) = mpsc::channel(16);
    let worker = tokio::spawn(fib::notify_worker(notify_rx));

    let (ospf, mut ospf_rx) = subscriber_channel();
    let (stat, mut stat_rx) = subscriber_channel();
    let msg = |addr: &str| IbusMsg::NexthopUpd {
        addr: ip(addr),
        reachable: true,
        resolved: None,
        ifindex: None,
    };
    let msgs = [
        NotifyMsg::Subscribe {
            protocol: Protocol::OSPF,
            subscriber: ospf,
        },
        NotifyMsg::Subscribe {
            protocol: Protocol::STATIC,
            subscriber: stat,
        },
        NotifyMsg::Publish {
            target: NotifyTarget::Protocol(Protocol::OSPF),
            msg: msg("10.0.0.1"),
        },
        NotifyMsg::Publish {
            target: NotifyTarget::All,
            msg: msg("10.0.0.2"),
        },
        NotifyMsg::Activate,
        NotifyMsg::Publish {
            target: NotifyTarget::Protocol(Protocol::STATIC),
            msg: msg("10.0.0.3"),
        },
    ];
    for msg in msgs {
        notify_tx.send(msg).await.unwrap();
    }
    drop(notify_tx);
    worker.await.unwrap();

    let mut ospf_msgs = vec![];
    while let Ok(notification) = ospf_rx.try_recv() {
        ospf_msgs.push(notification.decode().unwrap());
    }
    assert_eq!(ospf_msgs, vec![msg("10.0.0.1"), msg("10.0.0.2")]);

    let mut stat_msgs = vec![];
    while let Ok(notification) = stat_rx.try_recv() {
        stat_msgs.push(notification.decode().unwrap());
    }
    assert_eq!(stat_msgs, vec![msg("10.0.0.2"), msg("10.0.0.3")]);
}

#[tokio::test]
async fn test_database_worker() {
    let db = database();
    let (db_tx, db_rx) = mpsc::channel(16);
    let worker = tokio::spawn(fib::db_worker(db.clone(), db_rx));

    let ospf = route_state("50.0.0.0/24", Protocol::OSPF);
    let stat = route_state("51.0.0.0/24", Protocol::STATIC);
    db_tx.send(DbMsg::Update(ospf.clone())).await.unwrap();
    db_tx.send(DbMsg::Update(stat.clone())).await.unwrap();
    db_tx.send(DbMsg::Delete(stat.db_key())).await.unwrap();

    let (responder, rx) = oneshot::channel();
    db_tx.send(DbMsg::ReadAll(responder)).await.unwrap();
    assert_eq!(rx.await.unwrap(), vec![ospf]);

    drop(db_tx);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_database_replay() {
    let db = database();
    {
        let mut db = db.lock().unwrap();
        for state in [
            route_state("50.0.0.0/24", Protocol::OSPF),
            route_state("33.1.10.0/24", Protocol::CONNECTED),
        ] {
            db.set(&state.db_key(), &state).unwrap();
        }
    }

    let (mut fib, receivers) = FibDispatch::channels(1024);
    fib.asic_up = true;
    let worker = tokio::spawn(fib::db_worker(db, receivers.db));
    let mut master = Master::new(Config::default(), fib);
    master.replay().await;

    // Connected routes are derived from interface addresses instead.
    assert!(master.rib.table.get(&net("33.1.10.0/24")).is_none());
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::OSPF));
    let routes = &entry(&master, "50.0.0.0/24").routes[&Protocol::OSPF];
    assert_eq!(routes[0].metric, 10);
    assert!(!routes[0].is_installed());

    // The route gets installed once its next hop becomes reachable.
    iface_add(&mut master, "eth1", 2, "33.1.10.1/24").await;
    assert_eq!(installed(&master, "50.0.0.0/24").len(), 1);

    drop(master);
    worker.await.unwrap();
}
