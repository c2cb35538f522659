//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod engine;
mod error;

use std::net::IpAddr;

use derive_new::new;
use ipnetwork::IpNetwork;
use ribd_utils::ip::IpNetworkExt;
use ribd_utils::policy::{
    MatchSets, Policy, PolicyAction, PolicyCondition, PolicyResult,
    PolicyStmt, PolicyType,
};
use ribd_utils::protocol::Protocol;

pub use crate::engine::{ApplyPolicyCfg, PolicyEngine};
pub use crate::error::Error;

// Route attributes relevant to the evaluation of routing policies.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(new)]
pub struct PolicyEntity {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub nexthop: IpAddr,
    pub metric: u32,
}

// Hooks invoked by the policy engine while policies are evaluated, applied
// or reverted.
//
// The owner of the policed entities implements this trait and hands it to the
// engine for the duration of each operation.
pub trait PolicyHandler {
    // Returns whether the entity still exists.
    fn is_entity_present(&self, entity: &PolicyEntity) -> bool;

    // Records that a statement of the given policy matched the entity.
    fn entity_updated(&mut self, entity: &PolicyEntity, policy: &str);

    // Returns the key that identifies the entity in per-policy bookkeeping.
    fn entity_map_index(&self, entity: &PolicyEntity) -> String;

    // Evaluates the policy against every known entity.
    fn traverse_and_apply(
        &mut self,
        policy: &Policy,
        policy_type: PolicyType,
        match_sets: &MatchSets,
    );

    // Reverts the effects the policy had on every entity it matched.
    fn traverse_and_reverse(&mut self, policy: &Policy);

    fn action_accept(&mut self, _entity: &PolicyEntity, _policy: &str) {}

    fn action_reject(&mut self, entity: &PolicyEntity, policy: &str);

    fn action_redistribute(
        &mut self,
        entity: &PolicyEntity,
        policy: &str,
        target: Protocol,
    );

    fn action_set_admin_distance(
        &mut self,
        entity: &PolicyEntity,
        policy: &str,
        distance: u32,
    );

    fn action_network_statement(
        &mut self,
        entity: &PolicyEntity,
        policy: &str,
        target: Protocol,
    );

    fn undo_reject(&mut self, entity: &PolicyEntity, policy: &str);

    fn undo_redistribute(
        &mut self,
        entity: &PolicyEntity,
        policy: &str,
        target: Protocol,
    );

    fn undo_set_admin_distance(&mut self, entity: &PolicyEntity, policy: &str);

    fn undo_network_statement(
        &mut self,
        entity: &PolicyEntity,
        policy: &str,
        target: Protocol,
    );
}

// ===== global functions =====

// Evaluates a single policy against the given entity, invoking the handler's
// action callbacks for every matching statement.
//
// Returns `None` when no statement matched.
pub fn apply_policy<H>(
    policy: &Policy,
    match_sets: &MatchSets,
    entity: &PolicyEntity,
    handler: &mut H,
) -> Option<PolicyResult>
where
    H: PolicyHandler + ?Sized,
{
    if !handler.is_entity_present(entity) {
        return None;
    }

    let mut matches = false;
    for stmt in policy.stmts.values() {
        // Check if all conditions in the policy statement are satisfied.
        if !stmt.conditions.values().all(|condition| {
            process_stmt_condition(stmt, condition, entity, match_sets)
        }) {
            continue;
        }

        matches = true;
        handler.entity_updated(entity, &policy.name);

        // Process actions defined in the policy statement.
        for action in stmt.actions.values() {
            match action {
                PolicyAction::Accept(true) => {
                    handler.action_accept(entity, &policy.name);
                }
                PolicyAction::Accept(false) => {
                    handler.action_reject(entity, &policy.name);
                    return Some(PolicyResult::Reject);
                }
                PolicyAction::SetAdminDistance(distance) => {
                    handler.action_set_admin_distance(
                        entity,
                        &policy.name,
                        *distance,
                    );
                }
                PolicyAction::Redistribute(target) => {
                    handler.action_redistribute(entity, &policy.name, *target);
                }
                PolicyAction::NetworkStatement(target) => {
                    handler.action_network_statement(
                        entity,
                        &policy.name,
                        *target,
                    );
                }
            }
        }
    }

    matches.then_some(PolicyResult::Accept)
}

// Invokes the undo counterpart of every action of the policy for the given
// entity.
pub fn reverse_policy<H>(
    policy: &Policy,
    entity: &PolicyEntity,
    handler: &mut H,
)
where
    H: PolicyHandler + ?Sized,
{
    for action in policy.stmts.values().flat_map(|stmt| stmt.actions.values())
    {
        match action {
            PolicyAction::Accept(true) => (),
            PolicyAction::Accept(false) => {
                handler.undo_reject(entity, &policy.name);
            }
            PolicyAction::SetAdminDistance(_) => {
                handler.undo_set_admin_distance(entity, &policy.name);
            }
            PolicyAction::Redistribute(target) => {
                handler.undo_redistribute(entity, &policy.name, *target);
            }
            PolicyAction::NetworkStatement(target) => {
                handler.undo_network_statement(entity, &policy.name, *target);
            }
        }
    }
}

// ===== helper functions =====

// Processes a single condition statement within a routing policy.
//
// Returns a boolean value indicating whether the condition is met.
fn process_stmt_condition(
    stmt: &PolicyStmt,
    condition: &PolicyCondition,
    entity: &PolicyEntity,
    match_sets: &MatchSets,
) -> bool {
    match condition {
        // "source-protocol"
        PolicyCondition::SrcProtocol(protocol) => entity.protocol == *protocol,
        // "match-prefix"
        PolicyCondition::MatchPrefix(range) => range.matches(&entity.prefix),
        // "match-prefix-set"
        PolicyCondition::MatchPrefixSet(name) => {
            match match_sets.prefixes.get(name) {
                Some(set) => {
                    set.mode == entity.prefix.address_family()
                        && stmt.prefix_set_match_type.compare(
                            &set.prefixes,
                            |range| range.matches(&entity.prefix),
                        )
                }
                None => false,
            }
        }
    }
}
