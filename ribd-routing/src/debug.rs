//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_utils::protocol::Protocol;
use tracing::{debug, debug_span};

use crate::collaborator::CollaboratorKind;
use crate::rib::ResolvedNexthop;

// RIB debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Selection
    SelectionChange(&'a IpNetwork, Option<Protocol>, Option<Protocol>),
    RouteInstall(&'a IpNetwork, Protocol, &'a IpAddr),
    RouteUninstall(&'a IpNetwork, Protocol, &'a IpAddr),
    DistanceChange(Protocol, u32),
    FullReselection(usize),
    // Reachability
    NexthopResolve(&'a IpNetwork, &'a IpAddr, &'a ResolvedNexthop),
    ReachabilityChange(&'a IpNetwork, Option<&'a ResolvedNexthop>),
    PropagationCycle(&'a IpNetwork),
    LinkChange(u32, bool),
    // Policy
    PolicyReject(&'a IpNetwork, Protocol),
    PolicyRedistribute(&'a IpNetwork, Protocol, Protocol),
    // Dispatch
    CollaboratorStatus(CollaboratorKind, bool),
    AsicBulkFlush(usize),
    DatabaseReplay(usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SelectionChange(prefix, old, new) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, ?old, ?new, "{}", self);
                });
            }
            Debug::RouteInstall(prefix, protocol, nexthop)
            | Debug::RouteUninstall(prefix, protocol, nexthop) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, %protocol, %nexthop, "{}", self);
                });
            }
            Debug::DistanceChange(protocol, distance) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%protocol, %distance, "{}", self);
                });
            }
            Debug::FullReselection(count) => {
                debug_span!("rib").in_scope(|| {
                    debug!(prefixes = %count, "{}", self);
                });
            }
            Debug::NexthopResolve(prefix, nexthop, resolved) => {
                debug_span!("rib", %prefix).in_scope(|| {
                    debug!(%nexthop, ?resolved, "{}", self);
                });
            }
            Debug::ReachabilityChange(prefix, resolved) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, ?resolved, "{}", self);
                });
            }
            Debug::PropagationCycle(prefix) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%prefix, "{}", self);
                });
            }
            Debug::LinkChange(ifindex, up) => {
                debug_span!("rib").in_scope(|| {
                    debug!(%ifindex, %up, "{}", self);
                });
            }
            Debug::PolicyReject(prefix, protocol) => {
                debug_span!("policy").in_scope(|| {
                    debug!(%prefix, %protocol, "{}", self);
                });
            }
            Debug::PolicyRedistribute(prefix, protocol, target) => {
                debug_span!("policy").in_scope(|| {
                    debug!(%prefix, %protocol, %target, "{}", self);
                });
            }
            Debug::CollaboratorStatus(kind, up) => {
                debug_span!("fib").in_scope(|| {
                    debug!(collaborator = %kind, %up, "{}", self);
                });
            }
            Debug::AsicBulkFlush(count) => {
                debug_span!("fib").in_scope(|| {
                    debug!(%count, "{}", self);
                });
            }
            Debug::DatabaseReplay(count) => {
                debug_span!("fib").in_scope(|| {
                    debug!(%count, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SelectionChange(..) => {
                write!(f, "selected protocol changed")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
            Debug::DistanceChange(..) => {
                write!(f, "administrative distance changed")
            }
            Debug::FullReselection(..) => {
                write!(f, "running full route reselection")
            }
            Debug::NexthopResolve(..) => {
                write!(f, "next hop resolved")
            }
            Debug::ReachabilityChange(..) => {
                write!(f, "prefix reachability changed")
            }
            Debug::PropagationCycle(..) => {
                write!(f, "propagation cycle detected, skipping prefix")
            }
            Debug::LinkChange(..) => {
                write!(f, "interface operational status changed")
            }
            Debug::PolicyReject(..) => {
                write!(f, "route rejected by policy")
            }
            Debug::PolicyRedistribute(..) => {
                write!(f, "redistributing route")
            }
            Debug::CollaboratorStatus(..) => {
                write!(f, "collaborator status changed")
            }
            Debug::AsicBulkFlush(..) => {
                write!(f, "flushing bulk route batch")
            }
            Debug::DatabaseReplay(..) => {
                write!(f, "replaying routes from the database")
            }
        }
    }
}
