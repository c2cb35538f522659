//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::ip::{AddressFamily, IpNetworkExt};
use crate::protocol::Protocol;

// Type aliases.
pub type Policies = BTreeMap<String, Arc<Policy>>;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PolicyType {
    Import,
    Export,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PolicyResult {
    Accept,
    Reject,
}

// Default policy type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DefaultPolicyType {
    #[default]
    AcceptRoute,
    RejectRoute,
}

// Range of IP prefixes.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct IpPrefixRange {
    pub prefix: IpNetwork,
    pub masklen_lower: u8,
    pub masklen_upper: u8,
}

// Behavior of a match statement.
#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub enum MatchSetRestrictedType {
    // Match is true if given value matches any member of the defined set.
    #[default]
    Any,
    // Match is true if given value does not match any member of the defined
    // set.
    Invert,
}

// Sets of attributes used in policy match statements.
#[derive(Clone, Debug, Default)]
pub struct MatchSets {
    pub prefixes: BTreeMap<String, PrefixSet>,
}

// List of IPv4 or IPv6 prefixes that are matched as part of a policy.
#[derive(Clone, Debug)]
pub struct PrefixSet {
    pub name: String,
    pub mode: AddressFamily,
    pub prefixes: BTreeSet<IpPrefixRange>,
}

// Policy definition.
#[derive(Clone, Debug)]
pub struct Policy {
    // Name of the policy.
    pub name: String,
    // List of statements, evaluated in key order.
    pub stmts: BTreeMap<String, PolicyStmt>,
}

// Policy statements.
#[derive(Clone, Debug)]
pub struct PolicyStmt {
    pub name: String,
    pub prefix_set_match_type: MatchSetRestrictedType,
    pub conditions: BTreeMap<PolicyConditionType, PolicyCondition>,
    pub actions: BTreeMap<PolicyActionType, PolicyAction>,
}

// Policy condition statement type.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PolicyConditionType {
    SrcProtocol,
    MatchPrefix,
    MatchPrefixSet,
}

// Policy condition statement.
#[derive(Clone, Debug, EnumAsInner)]
pub enum PolicyCondition {
    SrcProtocol(Protocol),
    MatchPrefix(IpPrefixRange),
    MatchPrefixSet(String),
}

// Policy action statement type.
//
// Actions run in the order of this enumeration.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PolicyActionType {
    Accept,
    SetAdminDistance,
    Redistribute,
    NetworkStatement,
}

// Policy action statement.
#[derive(Clone, Debug, EnumAsInner)]
pub enum PolicyAction {
    Accept(bool),
    SetAdminDistance(u32),
    Redistribute(Protocol),
    NetworkStatement(Protocol),
}

// ===== impl IpPrefixRange =====

impl IpPrefixRange {
    pub fn new(
        prefix: IpNetwork,
        masklen_lower: u8,
        masklen_upper: u8,
    ) -> Self {
        IpPrefixRange {
            prefix: prefix.apply_mask(),
            masklen_lower,
            masklen_upper,
        }
    }

    // Returns an exact match range for the given prefix.
    pub fn exact(prefix: IpNetwork) -> Self {
        IpPrefixRange::new(prefix, prefix.prefix(), prefix.prefix())
    }

    // Returns whether the given prefix falls within this range.
    pub fn matches(&self, prefix: &IpNetwork) -> bool {
        if self.prefix.address_family() != prefix.address_family() {
            return false;
        }
        let plen = prefix.prefix();
        plen >= self.prefix.prefix()
            && plen >= self.masklen_lower
            && plen <= self.masklen_upper
            && self.prefix.contains(prefix.network())
    }
}

// ===== impl MatchSetRestrictedType =====

impl MatchSetRestrictedType {
    pub fn compare<T, F>(&self, set: &BTreeSet<T>, f: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        match self {
            MatchSetRestrictedType::Any => set.iter().any(f),
            MatchSetRestrictedType::Invert => !set.iter().any(f),
        }
    }
}

// ===== impl PrefixSet =====

impl PrefixSet {
    pub fn new(name: String, mode: AddressFamily) -> Self {
        PrefixSet {
            name,
            mode,
            prefixes: Default::default(),
        }
    }
}

// ===== impl Policy =====

impl Policy {
    pub fn new(name: String) -> Self {
        Policy {
            name,
            stmts: Default::default(),
        }
    }

    // Adds a statement to the policy, replacing any statement with the same
    // name.
    pub fn stmt_add(&mut self, stmt: PolicyStmt) {
        self.stmts.insert(stmt.name.clone(), stmt);
    }
}

// ===== impl PolicyStmt =====

impl PolicyStmt {
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix_set_match_type: Default::default(),
            conditions: Default::default(),
            actions: Default::default(),
        }
    }

    pub fn condition_add(&mut self, cond: PolicyCondition) {
        self.conditions.insert(cond.as_type(), cond);
    }

    pub fn action_add(&mut self, action: PolicyAction) {
        self.actions.insert(action.as_type(), action);
    }

    // Returns whether this statement unconditionally rejects every route
    // coming from the given protocol.
    pub fn rejects_protocol(&self, protocol: Protocol) -> bool {
        let protocol_match = self
            .conditions
            .values()
            .all(|cond| cond.as_src_protocol() == Some(&protocol));
        let reject = matches!(
            self.actions.get(&PolicyActionType::Accept),
            Some(PolicyAction::Accept(false))
        );
        !self.conditions.is_empty() && protocol_match && reject
    }
}

// ===== impl PolicyCondition =====

impl PolicyCondition {
    fn as_type(&self) -> PolicyConditionType {
        match self {
            PolicyCondition::SrcProtocol(..) => {
                PolicyConditionType::SrcProtocol
            }
            PolicyCondition::MatchPrefix(..) => {
                PolicyConditionType::MatchPrefix
            }
            PolicyCondition::MatchPrefixSet(..) => {
                PolicyConditionType::MatchPrefixSet
            }
        }
    }
}

// ===== impl PolicyAction =====

impl PolicyAction {
    fn as_type(&self) -> PolicyActionType {
        match self {
            PolicyAction::Accept(..) => PolicyActionType::Accept,
            PolicyAction::SetAdminDistance(..) => {
                PolicyActionType::SetAdminDistance
            }
            PolicyAction::Redistribute(..) => PolicyActionType::Redistribute,
            PolicyAction::NetworkStatement(..) => {
                PolicyActionType::NetworkStatement
            }
        }
    }
}

// ===== unit tests =====
