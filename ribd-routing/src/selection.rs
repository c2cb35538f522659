//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use ribd_policy::PolicyEngine;
use ribd_utils::ip::{AddressFamily, IpAddrExt, IpNetworkExt};
use ribd_utils::policy::{PolicyResult, PolicyType};
use ribd_utils::protocol::Protocol;

use crate::debug::Debug;
use crate::fib::FibDispatch;
use crate::policy::PolicyBridge;
use crate::rib::{
    ResolvedNexthop, Rib, Route, RouteFlags, RouteKey, db_key,
};

// Extent of a route withdrawal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteScope {
    // The route is removed from both the FIB and the RIB.
    FibAndRib,
    // The route is removed from the FIB only and kept in the RIB as
    // unreachable until its egress interface comes back up.
    FibOnly,
}

// ===== impl Rib =====

impl Rib {
    // Adds routes of a single protocol to the given prefix.
    //
    // A strictly lower metric replaces the protocol's existing group, an equal
    // metric extends it with new ECMP members and a higher metric is ignored.
    // With `replace` set, the existing group is always replaced.
    pub(crate) fn route_group_add(
        &mut self,
        prefix: IpNetwork,
        protocol: Protocol,
        routes: Vec<Route>,
        replace: bool,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        let Some(metric) = routes.first().map(|route| route.metric) else {
            return;
        };
        let old_reach = self.reach_state(&prefix);

        // Detach the routes being replaced.
        let group =
            self.table.entry(prefix).routes.entry(protocol).or_default();
        let group_metric = group.first().map(|route| route.metric);
        let removed = match group_metric {
            Some(group_metric) if metric > group_metric && !replace => {
                return;
            }
            Some(group_metric) if metric < group_metric || replace => {
                std::mem::take(group)
            }
            _ => vec![],
        };
        for route in removed {
            self.route_release(route, fib);
        }

        // Insert the new routes.
        let mut added = vec![];
        for mut route in routes {
            let exists = self
                .table
                .get(&prefix)
                .and_then(|entry| entry.routes.get(&protocol))
                .is_some_and(|group| {
                    group.iter().any(|r| r.same_nexthop(&route))
                });
            if exists {
                continue;
            }

            route.index = self.table.index_push(&route);
            if !route.is_terminal() {
                self.deps.add(route.nexthop);
                if !route.flags.contains(RouteFlags::LINK_DOWN) {
                    route.resolved = self.resolve_route(&route);
                    Debug::NexthopResolve(
                        &prefix,
                        &route.nexthop,
                        &route.resolved,
                    )
                    .log();
                }
            }
            added.push(route.policy_entity());
            self.table
                .entry(prefix)
                .routes
                .entry(protocol)
                .or_default()
                .push(route);
        }

        // Run the new routes through the import policies.
        for entity in added {
            let mut bridge = PolicyBridge::new(self, fib);
            let result =
                policy.evaluate(PolicyType::Import, &entity, &mut bridge);
            if result == PolicyResult::Reject {
                Debug::PolicyReject(&entity.prefix, entity.protocol).log();
                self.route_set_rejected(
                    &entity.prefix,
                    entity.protocol,
                    &entity.nexthop,
                    true,
                );
            }
        }

        self.refresh(prefix, old_reach, policy, fib);
    }

    // Withdraws the routes matching the given key.
    //
    // Returns whether any route matched.
    pub(crate) fn route_del(
        &mut self,
        key: RouteKey,
        scope: DeleteScope,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) -> bool {
        self.routes_del(key.prefix, key.protocol, scope, policy, fib, |route| {
            key.matches(route)
        })
    }

    // Withdraws the routes of the given protocol and prefix accepted by the
    // provided filter.
    pub(crate) fn routes_del<F>(
        &mut self,
        prefix: IpNetwork,
        protocol: Protocol,
        scope: DeleteScope,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
        filter: F,
    ) -> bool
    where
        F: Fn(&Route) -> bool,
    {
        let old_reach = self.reach_state(&prefix);
        let Some(group) = self
            .table
            .get_mut(&prefix)
            .and_then(|entry| entry.routes.get_mut(&protocol))
        else {
            return false;
        };

        match scope {
            DeleteScope::FibAndRib => {
                let (removed, kept): (Vec<_>, Vec<_>) =
                    std::mem::take(group).into_iter().partition(&filter);
                *group = kept;
                if removed.is_empty() {
                    return false;
                }
                for route in removed {
                    self.route_release(route, fib);
                }
            }
            DeleteScope::FibOnly => {
                let mut marked = vec![];
                for route in group.iter_mut().filter(|route| {
                    filter(route)
                        && !route.flags.contains(RouteFlags::LINK_DOWN)
                }) {
                    route.flags.insert(RouteFlags::LINK_DOWN);
                    route.resolved.reachable = false;
                    route.updated = Utc::now();
                    marked.push(route.clone());
                }
                if marked.is_empty() {
                    return false;
                }
                for route in &marked {
                    self.table.index_set_valid(route, false);
                }
            }
        }

        self.refresh(prefix, old_reach, policy, fib);
        true
    }

    // Re-runs selection for the given prefix, persists its routes and
    // propagates any resulting reachability change.
    //
    // `old_reach` is the reachability state of the prefix before it was
    // modified.
    pub(crate) fn refresh(
        &mut self,
        prefix: IpNetwork,
        old_reach: Option<ResolvedNexthop>,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        self.reconcile(prefix, policy, fib, false);
        self.db_sync(&prefix, fib);
        if self.reach_state(&prefix) != old_reach {
            self.propagate(prefix, policy, fib);
        }
    }

    // Selects the best protocol for the given prefix and brings the FIB in
    // line with it.
    //
    // Routes about to be installed are run through the export policies.
    // With `recheck` set, routes that are already installed are evaluated
    // again as well.
    pub(crate) fn reconcile(
        &mut self,
        prefix: IpNetwork,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
        recheck: bool,
    ) {
        loop {
            let Some(entry) = self.table.get_mut(&prefix) else {
                return;
            };

            // Remove the entry once its last route is gone.
            entry.routes.retain(|_, group| !group.is_empty());
            if entry.routes.is_empty() {
                if entry.selected.is_some() {
                    Debug::SelectionChange(&prefix, entry.selected, None).log();
                }
                self.table.remove(&prefix);
                return;
            }

            // Find the most preferred protocol not entirely rejected by
            // policy.
            let best = entry
                .routes
                .iter()
                .filter(|(protocol, group)| {
                    !policy.protocol_rejected(**protocol)
                        && !group.iter().all(|route| {
                            route.flags.contains(RouteFlags::REJECTED)
                        })
                })
                .map(|(protocol, _)| *protocol)
                .min_by_key(|protocol| self.distances.preference(*protocol));
            if entry.selected != best {
                Debug::SelectionChange(&prefix, entry.selected, best).log();
                entry.selected = best;
            }

            // Routes that must leave the FIB.
            let mut uninstall = vec![];
            for route in entry.routes.values_mut().flatten() {
                if route.is_installed()
                    && (Some(route.protocol) != best || !route.is_usable())
                {
                    route.flags.remove(RouteFlags::INSTALLED);
                    uninstall.push(route.clone());
                }
            }

            // Routes that must enter the FIB, followed by the ones whose
            // export disposition must be evaluated again.
            let install = entry
                .selected_routes()
                .filter(|route| !route.is_installed() && route.is_usable())
                .cloned()
                .collect::<Vec<_>>();
            let installed = entry
                .selected_routes()
                .filter(|route| recheck && route.is_installed())
                .cloned()
                .collect::<Vec<_>>();

            for route in &uninstall {
                self.fib_uninstall(route, fib);
            }

            let mut rejected = false;
            for route in install.iter().chain(installed.iter()) {
                let entity = route.policy_entity();
                let mut bridge = PolicyBridge::new(self, fib);
                let result =
                    policy.evaluate(PolicyType::Export, &entity, &mut bridge);
                if result == PolicyResult::Reject {
                    Debug::PolicyReject(&route.prefix, route.protocol).log();
                    self.route_set_rejected(
                        &route.prefix,
                        route.protocol,
                        &route.nexthop,
                        true,
                    );
                    rejected = true;
                    break;
                }
            }
            if rejected {
                // Start over with the updated dispositions.
                continue;
            }

            for route in &install {
                if let Some(route) = self.table.route_mut(
                    &prefix,
                    route.protocol,
                    &route.nexthop,
                ) {
                    route.flags.insert(RouteFlags::INSTALLED);
                }
                self.fib_install(route, fib);
            }
            return;
        }
    }

    // Re-runs selection for every prefix.
    pub(crate) fn reselect_all(
        &mut self,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        self.reselect_pending = false;

        let prefixes = self
            .table
            .iter()
            .map(|(prefix, _)| prefix)
            .collect::<Vec<_>>();
        Debug::FullReselection(prefixes.len()).log();
        for prefix in prefixes {
            let old_reach = self.reach_state(&prefix);
            self.refresh(prefix, old_reach, policy, fib);
        }
    }

    // Clears all policy dispositions, evaluates every route against the
    // import policies and re-runs selection with the export policies
    // evaluated again.
    pub(crate) fn policy_reevaluate(
        &mut self,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        let prefixes = self
            .table
            .iter()
            .map(|(prefix, _)| prefix)
            .collect::<Vec<_>>();
        for prefix in prefixes {
            let old_reach = self.reach_state(&prefix);
            let Some(entry) = self.table.get_mut(&prefix) else {
                continue;
            };
            let mut entities = vec![];
            for route in entry.routes.values_mut().flatten() {
                route.flags.remove(RouteFlags::REJECTED);
                entities.push(route.policy_entity());
            }

            for entity in entities {
                let mut bridge = PolicyBridge::new(self, fib);
                let result =
                    policy.evaluate(PolicyType::Import, &entity, &mut bridge);
                if result == PolicyResult::Reject {
                    self.route_set_rejected(
                        &entity.prefix,
                        entity.protocol,
                        &entity.nexthop,
                        true,
                    );
                }
            }

            self.reconcile(prefix, policy, fib, true);
            self.db_sync(&prefix, fib);
            if self.reach_state(&prefix) != old_reach {
                self.propagate(prefix, policy, fib);
            }
        }
    }

    // Handles an interface going down.
    //
    // Routes egressing through the interface are withdrawn from the FIB only.
    pub(crate) fn link_down(
        &mut self,
        ifindex: u32,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        Debug::LinkChange(ifindex, false).log();

        let keys = self
            .table
            .iter()
            .flat_map(|(_, entry)| entry.routes.values().flatten())
            .filter(|route| route.ifindex == ifindex)
            .map(|route| {
                RouteKey::new(route.prefix, route.protocol, Some(route.nexthop))
            })
            .collect::<Vec<_>>();
        for key in keys {
            self.route_del(key, DeleteScope::FibOnly, policy, fib);
        }
    }

    // Handles an interface coming up.
    //
    // Routes egressing through the interface are revived and resolved again.
    pub(crate) fn link_up(
        &mut self,
        ifindex: u32,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        Debug::LinkChange(ifindex, true).log();

        let mut touched = vec![];
        let mut revived = vec![];
        for af in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
            self.table.visit_mut(af, |prefix, entry| {
                let old_reach = entry.reach_state();
                let mut changed = false;
                for route in entry
                    .routes
                    .values_mut()
                    .flatten()
                    .filter(|route| route.ifindex == ifindex)
                {
                    if route.flags.contains(RouteFlags::LINK_DOWN) {
                        route.flags.remove(RouteFlags::LINK_DOWN);
                        route.updated = Utc::now();
                        revived.push((af, route.index));
                    }
                    if route.is_terminal() {
                        route.resolved.reachable = true;
                    }
                    changed = true;
                }
                if changed {
                    touched.push((prefix, old_reach));
                }
            });
        }

        // Revalidate the ordered index slots in place.
        for (af, idx) in revived {
            if let Some(slot) = self.table.index.get_mut(af).get_mut(idx) {
                slot.valid = true;
            }
        }

        for (prefix, old_reach) in touched {
            self.reresolve(&prefix, |route| route.ifindex == ifindex);
            self.refresh(prefix, old_reach, policy, fib);
        }
    }

    // Adds the connected route of an interface address.
    pub(crate) fn connected_route_add(
        &mut self,
        addr: IpNetwork,
        ifindex: u32,
        operative: bool,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        let prefix = addr.apply_mask();
        let nexthop = IpAddr::unspecified(prefix.address_family());
        let mut flags = RouteFlags::empty();
        if !operative {
            flags.insert(RouteFlags::LINK_DOWN);
        }
        let now = Utc::now();
        let route = Route {
            protocol: Protocol::CONNECTED,
            prefix,
            nexthop,
            ifindex,
            metric: 0,
            weight: 1,
            resolved: ResolvedNexthop::new(nexthop, ifindex, operative),
            index: 0,
            created: now,
            updated: now,
            flags,
        };
        self.route_group_add(
            prefix,
            Protocol::CONNECTED,
            vec![route],
            false,
            policy,
            fib,
        );
    }

    // Removes the connected route of an interface address.
    pub(crate) fn connected_route_del(
        &mut self,
        addr: IpNetwork,
        ifindex: u32,
        policy: &PolicyEngine,
        fib: &mut FibDispatch,
    ) {
        let prefix = addr.apply_mask();
        self.routes_del(
            prefix,
            Protocol::CONNECTED,
            DeleteScope::FibAndRib,
            policy,
            fib,
            |route| route.ifindex == ifindex,
        );
    }

    // Resolves again the non-terminal routes of the given prefix accepted by
    // the provided filter.
    pub(crate) fn reresolve<F>(&mut self, prefix: &IpNetwork, filter: F)
    where
        F: Fn(&Route) -> bool,
    {
        let Some(entry) = self.table.get(prefix) else {
            return;
        };
        let updates = entry
            .routes
            .values()
            .flatten()
            .filter(|route| {
                !route.is_terminal()
                    && !route.flags.contains(RouteFlags::LINK_DOWN)
                    && filter(route)
            })
            .map(|route| {
                (route.protocol, route.nexthop, self.resolve_route(route))
            })
            .collect::<Vec<_>>();
        for (protocol, nexthop, resolved) in updates {
            if let Some(route) =
                self.table.route_mut(prefix, protocol, &nexthop)
                && route.resolved != resolved
            {
                route.resolved = resolved;
                route.updated = Utc::now();
            }
        }
    }

    // Sets or clears the policy rejection flag of a route.
    pub(crate) fn route_set_rejected(
        &mut self,
        prefix: &IpNetwork,
        protocol: Protocol,
        nexthop: &IpAddr,
        rejected: bool,
    ) {
        if let Some(route) = self.table.route_mut(prefix, protocol, nexthop) {
            route.flags.set(RouteFlags::REJECTED, rejected);
        }
    }

    // Writes the state of all routes of the given prefix to the database.
    pub(crate) fn db_sync(&self, prefix: &IpNetwork, fib: &mut FibDispatch) {
        for state in self.prefix_states(prefix) {
            fib.db_update(state);
        }
    }

    // Releases all resources held by a route removed from the RIB.
    fn route_release(&mut self, route: Route, fib: &mut FibDispatch) {
        if route.is_installed() {
            self.fib_uninstall(&route, fib);
        }
        if !route.is_terminal() {
            self.deps.remove(&route.nexthop);
        }
        self.table.index_set_valid(&route, false);
        fib.db_delete(db_key(&route.prefix, route.protocol, &route.nexthop));

        // Forget the route in the policy bookkeeping.
        let entity = route.policy_entity();
        self.policy_routes.retain(|_, entities| {
            entities.remove(&entity);
            !entities.is_empty()
        });

        // Withdraw redistributed copies once no route of the protocol is
        // left for the prefix.
        let remaining = self
            .table
            .get(&route.prefix)
            .and_then(|entry| entry.routes.get(&route.protocol))
            .is_some_and(|group| !group.is_empty());
        if !remaining {
            self.redistribute_withdraw(&route.prefix, route.protocol, fib);
        }
    }

    // Programs a route into the FIB.
    fn fib_install(&mut self, route: &Route, fib: &mut FibDispatch) {
        fib.route_install(route);
        if let Some((addr, ifindex)) = arp_target(route)
            && self.deps.arp_ref(addr, ifindex)
        {
            fib.arp_resolve(addr, ifindex);
        }
    }

    // Removes a route from the FIB.
    pub(crate) fn fib_uninstall(
        &mut self,
        route: &Route,
        fib: &mut FibDispatch,
    ) {
        fib.route_uninstall(route);
        if let Some((addr, ifindex)) = arp_target(route)
            && self.deps.arp_unref(&addr)
        {
            fib.arp_release(addr, ifindex);
        }
    }
}

// ===== helper functions =====

// Returns the resolved next hop that needs layer 2 resolution, if any.
fn arp_target(route: &Route) -> Option<(IpAddr, u32)> {
    if route.flags.contains(RouteFlags::NULL)
        || route.resolved.addr.is_unspecified()
    {
        return None;
    }
    Some((route.resolved.addr, route.resolved.ifindex))
}
