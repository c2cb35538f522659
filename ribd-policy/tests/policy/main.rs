//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//


use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_policy::{PolicyEntity, PolicyHandler, apply_policy, reverse_policy};
use ribd_utils::policy::{
    MatchSets, Policy, PolicyAction, PolicyCondition, PolicyResult,
    PolicyStmt, PolicyType,
};
use ribd_utils::protocol::Protocol;

//
// Helper types.
//

// Handler that records every callback invoked by the policy engine.
#[derive(Debug, Default)]
pub struct MockHandler {
    pub entities: BTreeSet<PolicyEntity>,
    pub matched: BTreeMap<String, BTreeSet<PolicyEntity>>,
    pub rejected: BTreeSet<PolicyEntity>,
    pub redistributed: BTreeSet<(String, Protocol)>,
    pub network_statements: BTreeSet<(String, Protocol)>,
    pub distances: BTreeMap<Protocol, u32>,
}

impl PolicyHandler for MockHandler {
    fn is_entity_present(&self, entity: &PolicyEntity) -> bool {
        self.entities.contains(entity)
    }

    fn entity_updated(&mut self, entity: &PolicyEntity, policy: &str) {
        self.matched
            .entry(policy.to_owned())
            .or_default()
            .insert(entity.clone());
    }

    fn entity_map_index(&self, entity: &PolicyEntity) -> String {
        format!("{}|{}", entity.prefix, entity.protocol)
    }

    fn traverse_and_apply(
        &mut self,
        policy: &Policy,
        _policy_type: PolicyType,
        match_sets: &MatchSets,
    ) {
        let entities = self.entities.clone();
        for entity in &entities {
            apply_policy(policy, match_sets, entity, self);
        }
    }

    fn traverse_and_reverse(&mut self, policy: &Policy) {
        let matched = self.matched.remove(&policy.name).unwrap_or_default();
        for entity in &matched {
            reverse_policy(policy, entity, self);
        }
    }

    fn action_reject(&mut self, entity: &PolicyEntity, _policy: &str) {
        self.rejected.insert(entity.clone());
    }

    fn action_redistribute(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        let key = self.entity_map_index(entity);
        self.redistributed.insert((key, target));
    }

    fn action_set_admin_distance(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        distance: u32,
    ) {
        self.distances.insert(entity.protocol, distance);
    }

    fn action_network_statement(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        let key = self.entity_map_index(entity);
        self.network_statements.insert((key, target));
    }

    fn undo_reject(&mut self, entity: &PolicyEntity, _policy: &str) {
        self.rejected.remove(entity);
    }

    fn undo_redistribute(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        let key = self.entity_map_index(entity);
        self.redistributed.remove(&(key, target));
    }

    fn undo_set_admin_distance(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
    ) {
        self.distances.remove(&entity.protocol);
    }

    fn undo_network_statement(
        &mut self,
        entity: &PolicyEntity,
        _policy: &str,
        target: Protocol,
    ) {
        let key = self.entity_map_index(entity);
        self.network_statements.remove(&(key, target));
    }
}

//
// Helper functions.
//

pub fn entity(prefix: &str, protocol: Protocol) -> PolicyEntity {
    let prefix: IpNetwork = prefix.parse().unwrap();
    let nexthop: IpAddr = "10.0.0.1".parse().unwrap();
    PolicyEntity::new(prefix, protocol, nexthop, 10)
}

pub fn policy(
    name: &str,
    conditions: Vec<PolicyCondition>,
    actions: Vec<PolicyAction>,
) -> Policy {
    let mut stmt = PolicyStmt::new("10".to_owned());
    for condition in conditions {
        stmt.condition_add(condition);
    }
    for action in actions {
        stmt.action_add(action);
    }
    let mut policy = Policy::new(name.to_owned());
    policy.stmt_add(stmt);
    policy
}

//
// Tests.
//

#[test]
fn test_apply_no_match() {
    let mut handler = MockHandler::default();
    let ospf = entity("10.1.0.0/16", Protocol::OSPF);
    handler.entities.insert(ospf.clone());

    let policy = policy(
        "p1",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![PolicyAction::Accept(false)],
    );
    let result =
        apply_policy(&policy, &MatchSets::default(), &ospf, &mut handler);
    assert_eq!(result, None);
    assert!(handler.rejected.is_empty());
    assert!(handler.matched.is_empty());
}

#[test]
fn test_apply_absent_entity() {
    let mut handler = MockHandler::default();
    let ospf = entity("10.1.0.0/16", Protocol::OSPF);

    let policy = policy(
        "p1",
        vec![PolicyCondition::SrcProtocol(Protocol::OSPF)],
        vec![PolicyAction::Accept(false)],
    );
    let result =
        apply_policy(&policy, &MatchSets::default(), &ospf, &mut handler);
    assert_eq!(result, None);
    assert!(handler.rejected.is_empty());
}

#[test]
fn test_apply_reject_and_undo() {
    let mut handler = MockHandler::default();
    let ospf = entity("10.1.0.0/16", Protocol::OSPF);
    handler.entities.insert(ospf.clone());

    let policy = policy(
        "p1",
        vec![PolicyCondition::SrcProtocol(Protocol::OSPF)],
        vec![PolicyAction::Accept(false)],
    );
    let result =
        apply_policy(&policy, &MatchSets::default(), &ospf, &mut handler);
    assert_eq!(result, Some(PolicyResult::Reject));
    assert!(handler.rejected.contains(&ospf));

    reverse_policy(&policy, &ospf, &mut handler);
    assert!(handler.rejected.is_empty());
}

#[test]
fn test_apply_redistribute() {
    let mut handler = MockHandler::default();
    let route = entity("40.1.10.0/24", Protocol::STATIC);
    handler.entities.insert(route.clone());

    let policy = policy(
        "redist",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![
            PolicyAction::Accept(true),
            PolicyAction::Redistribute(Protocol::OSPF),
        ],
    );
    let result =
        apply_policy(&policy, &MatchSets::default(), &route, &mut handler);
    assert_eq!(result, Some(PolicyResult::Accept));
    assert!(
        handler
            .redistributed
            .contains(&("40.1.10.0/24|static".to_owned(), Protocol::OSPF))
    );
    assert!(handler.matched["redist"].contains(&route));
}
