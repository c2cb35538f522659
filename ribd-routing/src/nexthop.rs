//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_utils::ip::IpNetworkExt;

use crate::error::ResolveError;
use crate::rib::{ResolvedNexthop, Rib, Route};

// Reference counts of next hops used by the RIB.
#[derive(Debug, Default)]
pub struct NexthopDeps {
    // Candidate routes depending on each next hop for resolution.
    refs: BTreeMap<IpAddr, usize>,
    // Installed routes forwarding through each resolved next hop.
    arp: BTreeMap<IpAddr, ArpRef>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArpRef {
    pub ifindex: u32,
    pub count: usize,
}

// Result of a successful next hop resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Resolution {
    // Prefix of the route covering the resolved address.
    pub first_hop: IpNetwork,
    // Terminal hop the address resolves to.
    pub terminal: ResolvedNexthop,
}

// ===== impl NexthopDeps =====

impl NexthopDeps {
    pub(crate) fn add(&mut self, nexthop: IpAddr) {
        *self.refs.entry(nexthop).or_default() += 1;
    }

    pub(crate) fn remove(&mut self, nexthop: &IpAddr) {
        if let btree_map::Entry::Occupied(mut o) = self.refs.entry(*nexthop) {
            *o.get_mut() -= 1;
            if *o.get() == 0 {
                o.remove();
            }
        }
    }

    pub fn refcount(&self, nexthop: &IpAddr) -> usize {
        self.refs.get(nexthop).copied().unwrap_or(0)
    }

    // Returns whether any route depends on a next hop covered by the given
    // prefix.
    pub fn has_dependents(&self, prefix: &IpNetwork) -> bool {
        let (first, last) = prefix.addr_range();
        self.refs.range(first..=last).next().is_some()
    }

    // Takes a reference on a resolved next hop.
    //
    // Returns true when this is the first reference, meaning the address
    // needs to be resolved.
    pub(crate) fn arp_ref(&mut self, addr: IpAddr, ifindex: u32) -> bool {
        let entry =
            self.arp.entry(addr).or_insert(ArpRef { ifindex, count: 0 });
        entry.count += 1;
        entry.count == 1
    }

    // Releases a reference on a resolved next hop.
    //
    // Returns true when the last reference is gone.
    pub(crate) fn arp_unref(&mut self, addr: &IpAddr) -> bool {
        let btree_map::Entry::Occupied(mut o) = self.arp.entry(*addr) else {
            return false;
        };
        o.get_mut().count -= 1;
        if o.get().count == 0 {
            o.remove();
            return true;
        }
        false
    }

    pub fn arp_refcount(&self, addr: &IpAddr) -> usize {
        self.arp.get(addr).map(|entry| entry.count).unwrap_or(0)
    }

    // Returns an iterator over all resolved next hops in use.
    pub fn arp_iter(&self) -> impl Iterator<Item = (&IpAddr, &ArpRef)> + '_ {
        self.arp.iter()
    }
}

// ===== impl Rib =====

impl Rib {
    // Resolves the given address to a terminal next hop.
    //
    // The walk follows the selected routes covering each hop until one that
    // is directly connected (or a null route) is found. `origin` is the prefix
    // of the route being resolved, if any, so that a route can't resolve
    // through itself.
    pub fn resolve(
        &self,
        addr: IpAddr,
        origin: Option<IpNetwork>,
    ) -> Result<Resolution, ResolveError> {
        let mut visited = BTreeSet::new();
        visited.extend(origin);

        let mut first_hop = None;
        let mut current = addr;
        for _ in 0..self.max_hops {
            let (prefix, entry) = self
                .table
                .longest_prefix_match(&current, |_, entry| {
                    entry.selected.is_some()
                })
                .ok_or(ResolveError::Unreachable(current))?;
            if !visited.insert(prefix) {
                return Err(ResolveError::ResolutionCycle(addr));
            }
            first_hop.get_or_insert(prefix);

            // Prefer a usable member of the ECMP group.
            let routes = entry.selected_routes().collect::<Vec<_>>();
            let Some(route) = routes
                .iter()
                .find(|route| route.is_usable())
                .or_else(|| routes.first())
            else {
                return Err(ResolveError::Unreachable(current));
            };

            if route.is_terminal() {
                let terminal = ResolvedNexthop::new(
                    current,
                    route.resolved.ifindex,
                    route.resolved.reachable,
                );
                return Ok(Resolution {
                    first_hop: first_hop.unwrap_or(prefix),
                    terminal,
                });
            }
            current = route.nexthop;
        }

        Err(ResolveError::ResolutionCycle(addr))
    }

    // Computes the resolved next hop of an existing route.
    //
    // Resolution failures yield an unreachable next hop.
    pub(crate) fn resolve_route(&self, route: &Route) -> ResolvedNexthop {
        match self.resolve(route.nexthop, Some(route.prefix)) {
            Ok(resolution) => {
                let mut resolved = resolution.terminal;
                if route.ifindex != 0 {
                    resolved.ifindex = route.ifindex;
                }
                resolved
            }
            Err(error) => {
                if let ResolveError::ResolutionCycle(_) = error {
                    error.log();
                }
                ResolvedNexthop::new(route.nexthop, route.ifindex, false)
            }
        }
    }
}
