//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use ribd_utils::policy::{
    DefaultPolicyType, MatchSets, Policies, Policy, PolicyResult, PolicyType,
};
use ribd_utils::protocol::Protocol;
use tracing::debug;

use crate::error::Error;
use crate::{PolicyEntity, PolicyHandler, apply_policy};

#[derive(Debug, Default)]
pub struct PolicyEngine {
    // Configured policy definitions.
    pub policies: Policies,
    // Sets of attributes used in policy match statements.
    pub match_sets: MatchSets,
    // Policies applied to routes entering the RIB.
    pub import: ApplyPolicyCfg,
    // Policies applied to routes leaving the RIB.
    pub export: ApplyPolicyCfg,
}

// Ordered list of applied policies along with the default disposition.
#[derive(Clone, Debug, Default)]
pub struct ApplyPolicyCfg {
    pub policies: Vec<String>,
    pub default: DefaultPolicyType,
}

// ===== impl PolicyEngine =====

impl PolicyEngine {
    // Adds or replaces a policy definition.
    //
    // If the policy is currently applied, the effects of the old definition
    // are reverted and the new definition is applied in its place.
    pub fn policy_update<H>(&mut self, policy: Policy, handler: &mut H)
    where
        H: PolicyHandler + ?Sized,
    {
        let policy = Arc::new(policy);
        let applied = self.applied_types(&policy.name);
        if let Some(old_policy) =
            self.policies.insert(policy.name.clone(), policy.clone())
            && !applied.is_empty()
        {
            handler.traverse_and_reverse(&old_policy);
        }
        for policy_type in applied {
            handler.traverse_and_apply(&policy, policy_type, &self.match_sets);
        }
    }

    // Removes a policy definition, unapplying it first if needed.
    pub fn policy_remove<H>(
        &mut self,
        name: &str,
        handler: &mut H,
    ) -> Result<(), Error>
    where
        H: PolicyHandler + ?Sized,
    {
        let policy = self
            .policies
            .remove(name)
            .ok_or_else(|| Error::PolicyNotFound(name.to_owned()))?;
        if !self.applied_types(name).is_empty() {
            self.import.policies.retain(|applied| applied != name);
            self.export.policies.retain(|applied| applied != name);
            handler.traverse_and_reverse(&policy);
        }
        Ok(())
    }

    // Replaces the match sets and re-evaluates every applied policy.
    pub fn match_sets_update<H>(
        &mut self,
        match_sets: MatchSets,
        handler: &mut H,
    )
    where
        H: PolicyHandler + ?Sized,
    {
        self.match_sets = match_sets;
        for policy in self.policies.values() {
            let applied = self.applied_types(&policy.name);
            if applied.is_empty() {
                continue;
            }
            handler.traverse_and_reverse(policy);
            for policy_type in applied {
                handler.traverse_and_apply(
                    policy,
                    policy_type,
                    &self.match_sets,
                );
            }
        }
    }

    // Attaches a policy to the import or export chain and applies it to all
    // existing entities.
    pub fn policy_apply<H>(
        &mut self,
        name: &str,
        policy_type: PolicyType,
        handler: &mut H,
    ) -> Result<(), Error>
    where
        H: PolicyHandler + ?Sized,
    {
        let policy = self
            .policies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PolicyNotFound(name.to_owned()))?;
        let cfg = self.apply_cfg_mut(policy_type);
        if cfg.policies.iter().any(|applied| applied == name) {
            return Err(Error::PolicyAlreadyApplied(
                name.to_owned(),
                policy_type,
            ));
        }
        cfg.policies.push(name.to_owned());

        debug!(%name, ?policy_type, "applying policy");
        handler.traverse_and_apply(&policy, policy_type, &self.match_sets);
        Ok(())
    }

    // Detaches a policy from the import or export chain and reverts its
    // effects.
    pub fn policy_unapply<H>(
        &mut self,
        name: &str,
        policy_type: PolicyType,
        handler: &mut H,
    ) -> Result<(), Error>
    where
        H: PolicyHandler + ?Sized,
    {
        let cfg = self.apply_cfg_mut(policy_type);
        let Some(pos) = cfg.policies.iter().position(|applied| applied == name)
        else {
            return Err(Error::PolicyNotApplied(name.to_owned(), policy_type));
        };
        cfg.policies.remove(pos);
        let Some(policy) = self.policies.get(name).cloned() else {
            return Err(Error::PolicyNotFound(name.to_owned()));
        };

        debug!(%name, ?policy_type, "unapplying policy");
        handler.traverse_and_reverse(&policy);

        // The policy might still be attached to the other chain.
        for policy_type in self.applied_types(name) {
            handler.traverse_and_apply(&policy, policy_type, &self.match_sets);
        }
        Ok(())
    }

    // Runs the entity through the applied policies of the given chain.
    //
    // Evaluation stops at the first policy that rejects the entity. The
    // default disposition applies when no statement matched.
    pub fn evaluate<H>(
        &self,
        policy_type: PolicyType,
        entity: &PolicyEntity,
        handler: &mut H,
    ) -> PolicyResult
    where
        H: PolicyHandler + ?Sized,
    {
        let cfg = self.apply_cfg(policy_type);
        let mut matches = false;
        for policy in cfg
            .policies
            .iter()
            .filter_map(|name| self.policies.get(name))
        {
            match apply_policy(policy, &self.match_sets, entity, handler) {
                Some(PolicyResult::Reject) => return PolicyResult::Reject,
                Some(PolicyResult::Accept) => matches = true,
                None => (),
            }
        }

        if !matches && cfg.default == DefaultPolicyType::RejectRoute {
            return PolicyResult::Reject;
        }

        PolicyResult::Accept
    }

    // Returns whether an applied import policy rejects every route of the
    // given protocol.
    pub fn protocol_rejected(&self, protocol: Protocol) -> bool {
        self.import
            .policies
            .iter()
            .filter_map(|name| self.policies.get(name))
            .flat_map(|policy| policy.stmts.values())
            .any(|stmt| stmt.rejects_protocol(protocol))
    }

    // Returns the chains the given policy is attached to.
    pub fn applied_types(&self, name: &str) -> Vec<PolicyType> {
        [
            (PolicyType::Import, &self.import),
            (PolicyType::Export, &self.export),
        ]
        .into_iter()
        .filter(|(_, cfg)| cfg.policies.iter().any(|applied| applied == name))
        .map(|(policy_type, _)| policy_type)
        .collect()
    }

    fn apply_cfg(&self, policy_type: PolicyType) -> &ApplyPolicyCfg {
        match policy_type {
            PolicyType::Import => &self.import,
            PolicyType::Export => &self.export,
        }
    }

    fn apply_cfg_mut(
        &mut self,
        policy_type: PolicyType,
    ) -> &mut ApplyPolicyCfg {
        match policy_type {
            PolicyType::Import => &mut self.import,
            PolicyType::Export => &mut self.export,
        }
    }
}
