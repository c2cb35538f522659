//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod admission;
pub mod bulk;
pub mod collaborator;
mod debug;
pub mod distance;
pub mod error;
pub mod fib;
pub mod ibus;
pub mod interface;
pub mod nexthop;
pub mod policy;
mod reachability;
pub mod rib;
pub mod selection;

use std::collections::BTreeMap;
use std::time::Duration;

use ipnetwork::IpNetwork;
use ribd_policy::PolicyEngine;
use ribd_utils::protocol::Protocol;
use ribd_utils::task::Task;
use ribd_utils::{Database, Receiver, UnboundedReceiver};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Instrument, debug_span};

use crate::admission::RibHandle;
use crate::collaborator::{Collaborator, CollaboratorStatus};
use crate::debug::Debug;
use crate::error::Error;
use crate::fib::{ArpMsg, AsicRequest, FibDispatch};
use crate::ibus::RibMsg;
use crate::interface::Interfaces;
use crate::policy::PolicyBridge;
use crate::rib::{Rib, Route, RouteFlags, RouteState};

// Route-processing parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Size of the route-processing queue.
    pub queue_size: usize,
    // Size of each collaborator queue.
    pub fib_queue_size: usize,
    // Maximum number of routes per ASIC bulk request.
    pub bulk_size: usize,
    // Maximum number of hops walked when resolving a next hop.
    pub resolve_max_hops: usize,
}

pub struct Master {
    // Route-processing parameters.
    pub config: Config,
    // List of interfaces.
    pub interfaces: Interfaces,
    // RIB.
    pub rib: Rib,
    // Import and export policies.
    pub policy: PolicyEngine,
    // Collaborator hand-off.
    pub fib: FibDispatch,
}

// ===== impl Config =====

impl Default for Config {
    fn default() -> Config {
        Config {
            queue_size: 100000,
            fib_queue_size: 100000,
            bulk_size: 1000,
            resolve_max_hops: 16,
        }
    }
}

// ===== impl Master =====

impl Master {
    pub fn new(config: Config, fib: FibDispatch) -> Master {
        let rib = Rib::new(config.resolve_max_hops);
        Master {
            config,
            interfaces: Default::default(),
            rib,
            policy: Default::default(),
            fib,
        }
    }

    // Processes a single message, then hands the resulting requests over to
    // the collaborator workers.
    pub async fn process(&mut self, msg: RibMsg) {
        ibus::process_msg(self, msg);
        self.settle().await;
    }

    // Processes a collaborator connectivity change.
    pub async fn process_status(&mut self, status: CollaboratorStatus) {
        ibus::process_status(self, status);
        self.settle().await;
    }

    // Restores the routes saved in the database, then starts delivering
    // notifications to subscribers.
    //
    // Connected routes are not restored as they are derived from the
    // interface addresses, which are reported again after a restart. Routes
    // bound to an interface stay down until the interface is reported as
    // operative.
    pub async fn replay(&mut self) {
        match self.fib.db_read_all().await {
            Ok(states) => {
                Debug::DatabaseReplay(states.len()).log();

                let mut groups: BTreeMap<(IpNetwork, Protocol), Vec<Route>> =
                    BTreeMap::new();
                for state in states
                    .into_iter()
                    .filter(|state| state.protocol != Protocol::CONNECTED)
                {
                    groups
                        .entry((state.prefix, state.protocol))
                        .or_default()
                        .push(replay_route(state));
                }
                for ((prefix, protocol), routes) in groups {
                    self.rib.route_group_add(
                        prefix,
                        protocol,
                        routes,
                        false,
                        &self.policy,
                        &mut self.fib,
                    );
                }
            }
            Err(error) => {
                error.log();
            }
        }

        self.fib.activate();
        self.settle().await;
    }

    async fn run(
        &mut self,
        mut rib_rx: Receiver<RibMsg>,
        mut status_rx: UnboundedReceiver<CollaboratorStatus>,
    ) {
        loop {
            tokio::select! {
                msg = rib_rx.recv() => {
                    let Some(msg) = msg else {
                        return;
                    };
                    self.process(msg).await;
                }
                Some(status) = status_rx.recv() => {
                    self.process_status(status).await;
                }
            }
        }
    }

    // Runs a policy engine operation, then re-runs selection for every prefix
    // whose routes changed disposition.
    pub(crate) fn policy_op<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(
            &mut PolicyEngine,
            &mut PolicyBridge<'_>,
        ) -> Result<T, ribd_policy::Error>,
    {
        let mut bridge = PolicyBridge::new(&mut self.rib, &mut self.fib);
        let result = f(&mut self.policy, &mut bridge);
        bridge.reevaluate_released(&self.policy);
        let touched = bridge.into_touched();
        for (prefix, old_reach) in touched {
            self.rib
                .refresh(prefix, old_reach, &self.policy, &mut self.fib);
        }

        result.map_err(|error| {
            error.log();
            Error::Policy(error)
        })
    }

    async fn settle(&mut self) {
        if self.rib.reselect_pending {
            self.rib.reselect_all(&self.policy, &mut self.fib);
        }
        self.fib.flush().await;
    }
}

// ===== global functions =====

// Starts the route-processing task along with the collaborator workers.
//
// A collaborator that isn't provided is considered permanently down.
pub fn start<A, R>(
    config: Config,
    db: Database,
    asic: Option<A>,
    arp: Option<R>,
    retry_interval: Duration,
) -> RibHandle
where
    A: Collaborator<AsicRequest> + 'static,
    R: Collaborator<ArpMsg> + 'static,
{
    let (rib_tx, rib_rx) = mpsc::channel(config.queue_size);
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let (fib, receivers) = FibDispatch::channels(config.fib_queue_size);

    let mut tasks = vec![
        Task::spawn(fib::db_worker(db, receivers.db)),
        Task::spawn(fib::notify_worker(receivers.notify)),
    ];
    if let Some(asic) = asic {
        tasks.push(Task::spawn(collaborator::asic_worker(
            asic,
            receivers.asic,
            status_tx.clone(),
            config.bulk_size,
            retry_interval,
        )));
    }
    if let Some(arp) = arp {
        tasks.push(Task::spawn(collaborator::arp_worker(
            arp,
            receivers.arp,
            status_tx,
            retry_interval,
        )));
    }
    for task in &mut tasks {
        task.detach();
    }

    let mut master_task = Task::spawn(
        async move {
            let mut master = Master::new(config, fib);
            master.replay().await;
            master.run(rib_rx, status_rx).await;
        }
        .instrument(debug_span!("rib")),
    );
    master_task.detach();

    RibHandle::new(rib_tx)
}

// ===== helper functions =====

// Rebuilds a route from its saved state.
fn replay_route(state: RouteState) -> Route {
    let mut flags = state.flags & RouteFlags::NULL;
    let mut resolved = state.resolved;
    if state.ifindex != 0 {
        flags.insert(RouteFlags::LINK_DOWN);
        resolved.reachable = false;
    }

    Route {
        protocol: state.protocol,
        prefix: state.prefix,
        nexthop: state.nexthop,
        ifindex: state.ifindex,
        metric: state.metric,
        weight: state.weight,
        resolved,
        index: 0,
        created: state.created,
        updated: state.updated,
        flags,
    }
}
