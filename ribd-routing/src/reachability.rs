//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use ribd_policy::PolicyEngine;
use ribd_utils::ibus::IbusMsg;
use ribd_utils::ip::IpNetworkExt;
use ribd_utils::protocol::Protocol;

use crate::debug::Debug;
use crate::fib::{FibDispatch, NotifyTarget};
use crate::rib::{ResolvedNexthop, Rib, RouteFlags};

// Re-resolution of a route found while propagating a reachability change.
struct RouteUpdate {
    protocol: Protocol,
    nexthop: IpAddr,
    resolved: ResolvedNexthop,
}

// ===== impl Rib =====

impl Rib {
    // Propagates a reachability change of the given prefix to the routes
    // depending on it.
    //
    // Prefixes whose own reachability changes as a result are processed in
    // turn, breadth-first. A prefix is processed at most once per pass.
    pub(crate) fn propagate(
        &mut self,
        trigger: IpNetwork,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        let mut queue = VecDeque::from([trigger]);
        let mut visited = BTreeSet::new();

        while let Some(prefix) = queue.pop_front() {
            if !visited.insert(prefix) {
                Debug::PropagationCycle(&prefix).log();
                continue;
            }
            let reach = self.reach_state(&prefix);
            Debug::ReachabilityChange(&prefix, reach.as_ref()).log();

            // Notify the protocols tracking addresses covered by the prefix.
            self.nht_update(&prefix, fib);

            if !self.deps.has_dependents(&prefix) {
                continue;
            }

            // Find the routes whose resolution changed.
            let mut updates: BTreeMap<IpNetwork, Vec<RouteUpdate>> =
                BTreeMap::new();
            for (dep_prefix, entry) in
                self.table.iter_af(prefix.address_family())
            {
                for route in entry.routes.values().flatten() {
                    if route.is_terminal()
                        || route.flags.contains(RouteFlags::LINK_DOWN)
                        || !prefix.contains(route.nexthop)
                    {
                        continue;
                    }
                    let resolved = self.resolve_route(route);
                    if resolved != route.resolved {
                        updates.entry(dep_prefix).or_default().push(
                            RouteUpdate {
                                protocol: route.protocol,
                                nexthop: route.nexthop,
                                resolved,
                            },
                        );
                    }
                }
            }

            // Apply them.
            for (dep_prefix, updates) in updates {
                let old_reach = self.reach_state(&dep_prefix);
                for update in updates {
                    let Some(route) = self.table.route_mut(
                        &dep_prefix,
                        update.protocol,
                        &update.nexthop,
                    ) else {
                        continue;
                    };
                    Debug::NexthopResolve(
                        &dep_prefix,
                        &update.nexthop,
                        &update.resolved,
                    )
                    .log();

                    // Installed routes are withdrawn using their old
                    // resolution and installed again by the reconciliation.
                    let installed = route.is_installed().then(|| route.clone());
                    route.flags.remove(RouteFlags::INSTALLED);
                    route.resolved = update.resolved;
                    route.updated = Utc::now();
                    if let Some(installed) = installed {
                        self.fib_uninstall(&installed, fib);
                    }
                }

                self.reconcile(dep_prefix, policy, fib, false);
                self.db_sync(&dep_prefix, fib);
                if self.reach_state(&dep_prefix) != old_reach {
                    queue.push_back(dep_prefix);
                }
            }
        }
    }

    // Starts tracking the given address on behalf of a protocol.
    //
    // The protocol is notified of the current resolution right away.
    pub(crate) fn nexthop_track(
        &mut self,
        protocol: Protocol,
        addr: IpAddr,
        fib: &mut FibDispatch,
    ) {
        let resolved = self.nht_resolve(addr);
        let entry = self.nht.entry(addr).or_default();
        entry.protocols.insert(protocol);
        entry.last = resolved;
        fib.notify(
            NotifyTarget::Protocol(protocol),
            nexthop_msg(addr, resolved),
        );
    }

    // Stops tracking the given address on behalf of a protocol.
    pub(crate) fn nexthop_untrack(&mut self, protocol: Protocol, addr: IpAddr) {
        if let Some(entry) = self.nht.get_mut(&addr) {
            entry.protocols.remove(&protocol);
            if entry.protocols.is_empty() {
                self.nht.remove(&addr);
            }
        }
    }

    // Resolves again the tracked addresses covered by the given prefix,
    // notifying the interested protocols of any change.
    fn nht_update(&mut self, prefix: &IpNetwork, fib: &mut FibDispatch) {
        let addrs = self
            .nht
            .keys()
            .filter(|addr| prefix.contains(**addr))
            .copied()
            .collect::<Vec<_>>();
        for addr in addrs {
            let resolved = self.nht_resolve(addr);
            let Some(entry) = self.nht.get_mut(&addr) else {
                continue;
            };
            if entry.last == resolved {
                continue;
            }
            entry.last = resolved;
            for protocol in &entry.protocols {
                fib.notify(
                    NotifyTarget::Protocol(*protocol),
                    nexthop_msg(addr, resolved),
                );
            }
        }
    }

    fn nht_resolve(&self, addr: IpAddr) -> Option<ResolvedNexthop> {
        self.resolve(addr, None)
            .ok()
            .map(|resolution| resolution.terminal)
    }
}

// ===== helper functions =====

fn nexthop_msg(addr: IpAddr, resolved: Option<ResolvedNexthop>) -> IbusMsg {
    IbusMsg::NexthopUpd {
        addr,
        reachable: resolved.is_some_and(|resolved| resolved.reachable),
        resolved: resolved.map(|resolved| resolved.addr),
        ifindex: resolved.map(|resolved| resolved.ifindex),
    }
}
