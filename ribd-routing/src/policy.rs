//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ipnetwork::IpNetwork;
use ribd_policy::{
    PolicyEngine, PolicyEntity, PolicyHandler, apply_policy, reverse_policy,
};
use ribd_utils::ibus::IbusMsg;
use ribd_utils::policy::{MatchSets, Policy, PolicyResult, PolicyType};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::{RouteKeyMsg, RouteMsg};

use crate::debug::Debug;
use crate::fib::{FibDispatch, NotifyTarget};
use crate::rib::{Redistributed, ResolvedNexthop, Rib, RouteFlags};

// Policy engine callbacks acting on the RIB.
//
// Prefixes whose routes changed disposition are recorded along with their
// reachability state prior to the change, so that the caller can run
// selection on them once the policy operation completes.
pub struct PolicyBridge<'a> {
    rib: &'a mut Rib,
    fib: &'a mut FibDispatch,
    touched: BTreeMap<IpNetwork, Option<ResolvedNexthop>>,
    // Routes whose rejection was undone by a reverted policy.
    released: Vec<PolicyEntity>,
}

// ===== impl PolicyBridge =====

impl<'a> PolicyBridge<'a> {
    pub(crate) fn new(rib: &'a mut Rib, fib: &'a mut FibDispatch) -> Self {
        PolicyBridge {
            rib,
            fib,
            touched: Default::default(),
            released: Default::default(),
        }
    }

    // Runs routes released by a reverted reject action through the import
    // chain again. Other applied policies or the default disposition may
    // still reject them.
    pub(crate) fn reevaluate_released(&mut self, engine: &PolicyEngine) {
        for entity in std::mem::take(&mut self.released) {
            if !self.is_entity_present(&entity) {
                continue;
            }
            let result = engine.evaluate(PolicyType::Import, &entity, self);
            if result == PolicyResult::Reject {
                self.set_rejected(&entity, true);
            }
        }
    }

    // Returns the prefixes touched by the policy operation.
    pub(crate) fn into_touched(
        self,
    ) -> BTreeMap<IpNetwork, Option<ResolvedNexthop>> {
        self.touched
    }

    fn set_rejected(&mut self, entity: &PolicyEntity, rejected: bool) {
        let Some(route) = self.rib.table.route(
            &entity.prefix,
            entity.protocol,
            &entity.nexthop,
        ) else {
            return;
        };
        if route.flags.contains(RouteFlags::REJECTED) == rejected {
            return;
        }

        if !self.touched.contains_key(&entity.prefix) {
            let reach = self.rib.reach_state(&entity.prefix);
            self.touched.insert(entity.prefix, reach);
        }
        self.rib.route_set_rejected(
            &entity.prefix,
            entity.protocol,
            &entity.nexthop,
            rejected,
        );
    }
}

impl PolicyHandler for PolicyBridge<'_> {
    fn is_entity_present(&self, entity: &PolicyEntity) -> bool {
        self.rib
            .table
            .route(&entity.prefix, entity.protocol, &entity.nexthop)
            .is_some()
    }

    fn entity_updated(&mut self, entity: &PolicyEntity, policy: &str) {
        self.rib
            .policy_routes
            .entry(policy.to_owned())
            .or_default()
            .insert(entity.clone());
        if let Some(entry) = self.rib.table.get_mut(&entity.prefix) {
            entry.policies.insert(policy.to_owned());
            entry.policy_hits += 1;
        }
    }

    fn entity_map_index(&self, entity: &PolicyEntity) -> String {
        redistribution_key(&entity.prefix, entity.protocol)
    }

    fn traverse_and_apply(
        &mut self,
        policy: &Policy,
        policy_type: PolicyType,
        match_sets: &MatchSets,
    ) {
        // Import policies apply to all routes, export policies to the
        // installed ones only.
        let entities = self
            .rib
            .table
            .iter()
            .flat_map(|(_, entry)| entry.routes.values().flatten())
            .filter(|route| {
                policy_type == PolicyType::Import || route.is_installed()
            })
            .map(|route| route.policy_entity())
            .collect::<Vec<_>>();

        for entity in entities {
            if let Some(entry) = self.rib.table.get_mut(&entity.prefix) {
                entry.policy_valid = false;
            }
            apply_policy(policy, match_sets, &entity, self);
            if let Some(entry) = self.rib.table.get_mut(&entity.prefix) {
                entry.policy_valid = true;
            }
        }
    }

    fn traverse_and_reverse(&mut self, policy: &Policy) {
        let entities = self
            .rib
            .policy_routes
            .remove(&policy.name)
            .unwrap_or_default();
        for entity in entities {
            reverse_policy(policy, &entity, self);
            if let Some(entry) = self.rib.table.get_mut(&entity.prefix) {
                entry.policies.remove(&policy.name);
            }
        }
    }

    fn action_reject(&mut self, entity: &PolicyEntity, _policy: &str) {
        Debug::PolicyReject(&entity.prefix, entity.protocol).log();
        self.set_rejected(entity, true);
    }

    fn action_redistribute(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        self.rib.redistribute(entity, target, false, self.fib);
    }

    fn action_set_admin_distance(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        distance: u32,
    ) {
        if self.rib.distances.set(entity.protocol, distance) {
            self.rib.reselect_pending = true;
        }
    }

    fn action_network_statement(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        self.rib.redistribute(entity, target, true, self.fib);
    }

    fn undo_reject(&mut self, entity: &PolicyEntity, _policy: &str) {
        self.set_rejected(entity, false);
        self.released.push(entity.clone());
    }

    fn undo_redistribute(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        self.rib.redistribute_del(entity, target, self.fib);
    }

    fn undo_set_admin_distance(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
    ) {
        if self.rib.distances.unset(entity.protocol) {
            self.rib.reselect_pending = true;
        }
    }

    fn undo_network_statement(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        self.rib.redistribute_del(entity, target, self.fib);
    }
}

// ===== impl Rib =====

impl Rib {
    // Announces a route to the given target protocol.
    //
    // Routes already announced to the target are left alone.
    pub(crate) fn redistribute(
        &mut self,
        entity: &PolicyEntity,
        target: Protocol,
        network_statement: bool,
        fib: &mut FibDispatch,
    ) {
        let key = redistribution_key(&entity.prefix, entity.protocol);
        let routes = self.redistribution.entry(target).or_default();
        if routes.contains_key(&key) {
            return;
        }
        routes.insert(
            key,
            Redistributed {
                prefix: entity.prefix,
                protocol: entity.protocol,
                network_statement,
            },
        );

        Debug::PolicyRedistribute(&entity.prefix, entity.protocol, target)
            .log();
        let msg =
            self.route_msg(&entity.prefix, entity.protocol, network_statement);
        fib.notify(
            NotifyTarget::Protocol(target),
            IbusMsg::RouteRedistributeAdd(msg),
        );
    }

    // Withdraws a route announced to the given target protocol.
    pub(crate) fn redistribute_del(
        &mut self,
        entity: &PolicyEntity,
        target: Protocol,
        fib: &mut FibDispatch,
    ) {
        let key = redistribution_key(&entity.prefix, entity.protocol);
        let Some(routes) = self.redistribution.get_mut(&target) else {
            return;
        };
        if routes.remove(&key).is_none() {
            return;
        }
        if routes.is_empty() {
            self.redistribution.remove(&target);
        }

        let msg = RouteKeyMsg {
            protocol: entity.protocol,
            prefix: entity.prefix,
        };
        fib.notify(
            NotifyTarget::Protocol(target),
            IbusMsg::RouteRedistributeDel(msg),
        );
    }

    // Withdraws the given prefix and protocol from every target it was
    // announced to.
    pub(crate) fn redistribute_withdraw(
        &mut self,
        prefix: &IpNetwork,
        protocol: Protocol,
        fib: &mut FibDispatch,
    ) {
        let key = redistribution_key(prefix, protocol);
        for (target, routes) in self.redistribution.iter_mut() {
            if routes.remove(&key).is_some() {
                let msg = RouteKeyMsg {
                    protocol,
                    prefix: *prefix,
                };
                fib.notify(
                    NotifyTarget::Protocol(*target),
                    IbusMsg::RouteRedistributeDel(msg),
                );
            }
        }
        self.redistribution.retain(|_, routes| !routes.is_empty());
    }

    fn route_msg(
        &self,
        prefix: &IpNetwork,
        protocol: Protocol,
        network_statement: bool,
    ) -> RouteMsg {
        let routes = self
            .table
            .get(prefix)
            .and_then(|entry| entry.routes.get(&protocol));
        RouteMsg {
            protocol,
            prefix: *prefix,
            distance: self.distances.effective(protocol),
            metric: routes
                .and_then(|routes| routes.first())
                .map(|route| route.metric)
                .unwrap_or_default(),
            nexthops: routes
                .into_iter()
                .flatten()
                .map(|route| route.fib_nexthop())
                .collect(),
            network_statement,
        }
    }
}

// ===== global functions =====

pub(crate) fn redistribution_key(
    prefix: &IpNetwork,
    protocol: Protocol,
) -> String {
    format!("{}|{}", prefix, protocol)
}
