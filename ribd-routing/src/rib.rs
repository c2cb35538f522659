//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use prefix_trie::map::PrefixMap;
use ribd_policy::PolicyEntity;
use ribd_utils::ip::{AddressFamilies, AddressFamily, IpNetworkExt};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::Nexthop;
use serde::{Deserialize, Serialize};

use crate::distance::AdminDistances;
use crate::nexthop::NexthopDeps;

#[derive(Debug)]
pub struct Rib {
    // Candidate routes of all protocols.
    pub table: RouteTable,
    // Administrative distance of each protocol.
    pub distances: AdminDistances,
    // Next hop reference counts.
    pub deps: NexthopDeps,
    // Next hops tracked on behalf of routing protocols.
    pub nht: BTreeMap<IpAddr, NhtEntry>,
    // Routes redistributed into each target protocol.
    pub redistribution: BTreeMap<Protocol, BTreeMap<String, Redistributed>>,
    // Routes matched by each policy, used to revert the policy effects.
    pub policy_routes: BTreeMap<String, BTreeSet<PolicyEntity>>,
    // Set when an administrative distance changed.
    pub reselect_pending: bool,
    // Maximum number of hops walked when resolving a next hop.
    pub max_hops: usize,
}

// Longest-prefix-match table mapping each prefix to its candidate routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub ipv4: PrefixMap<Ipv4Network, RibEntry>,
    pub ipv6: PrefixMap<Ipv6Network, RibEntry>,
    // Append-only index used for paginated retrieval.
    pub index: AddressFamilies<Vec<DestIndex>>,
}

// Candidate routes for a single prefix.
#[derive(Debug, Default)]
pub struct RibEntry {
    // Protocol whose routes are selected for installation.
    pub selected: Option<Protocol>,
    // Candidate routes keyed by protocol. Each list is an ECMP group.
    pub routes: BTreeMap<Protocol, Vec<Route>>,
    pub policy_hits: u32,
    pub policies: BTreeSet<String>,
    // Cleared while a policy is being applied to this prefix.
    pub policy_valid: bool,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub nexthop: IpAddr,
    pub ifindex: u32,
    pub metric: u32,
    pub weight: u32,
    pub resolved: ResolvedNexthop,
    // Slot in the ordered index.
    pub index: usize,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub flags: RouteFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct RouteFlags: u8 {
        const INSTALLED = 0x01;
        const REJECTED = 0x02;
        const NULL = 0x04;
        const LINK_DOWN = 0x08;
    }
}

// Terminal next hop a route resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ResolvedNexthop {
    pub addr: IpAddr,
    pub ifindex: u32,
    pub reachable: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DestIndex {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub nexthop: IpAddr,
    pub valid: bool,
}

// Identifies one or all routes of a protocol for a given prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RouteKey {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub nexthop: Option<IpAddr>,
}

#[derive(Clone, Debug, Default)]
pub struct NhtEntry {
    pub protocols: BTreeSet<Protocol>,
    // Last resolution reported to the interested protocols.
    pub last: Option<ResolvedNexthop>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Redistributed {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub network_statement: bool,
}

// Route state as exposed to clients and written to the database.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteState {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub nexthop: IpAddr,
    pub ifindex: u32,
    pub metric: u32,
    pub weight: u32,
    pub distance: u32,
    pub resolved: ResolvedNexthop,
    pub selected: bool,
    pub flags: RouteFlags,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

// ===== impl Rib =====

impl Rib {
    pub fn new(max_hops: usize) -> Rib {
        Rib {
            table: Default::default(),
            distances: Default::default(),
            deps: Default::default(),
            nht: Default::default(),
            redistribution: Default::default(),
            policy_routes: Default::default(),
            reselect_pending: false,
            max_hops,
        }
    }

    // Returns the reachability state of the prefix, derived from the first
    // usable route of the selected protocol.
    pub fn reach_state(&self, prefix: &IpNetwork) -> Option<ResolvedNexthop> {
        self.table.get(prefix)?.reach_state()
    }

    // Returns the state of the given route.
    pub fn route_state(&self, route: &Route) -> RouteState {
        let selected = self
            .table
            .get(&route.prefix)
            .is_some_and(|entry| entry.selected == Some(route.protocol));
        RouteState {
            protocol: route.protocol,
            prefix: route.prefix,
            nexthop: route.nexthop,
            ifindex: route.ifindex,
            metric: route.metric,
            weight: route.weight,
            distance: self.distances.effective(route.protocol),
            resolved: route.resolved,
            selected,
            flags: route.flags,
            created: route.created,
            updated: route.updated,
        }
    }

    // Returns the state of all routes of the given prefix.
    pub fn prefix_states(&self, prefix: &IpNetwork) -> Vec<RouteState> {
        self.table
            .get(prefix)
            .map(|entry| {
                entry
                    .routes
                    .values()
                    .flatten()
                    .map(|route| self.route_state(route))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ===== impl RouteTable =====

impl RouteTable {
    pub fn get(&self, prefix: &IpNetwork) -> Option<&RibEntry> {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.get(prefix),
            IpNetwork::V6(prefix) => self.ipv6.get(prefix),
        }
    }

    pub fn get_mut(&mut self, prefix: &IpNetwork) -> Option<&mut RibEntry> {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.get_mut(prefix),
            IpNetwork::V6(prefix) => self.ipv6.get_mut(prefix),
        }
    }

    // Returns the entry of the given prefix, creating it if necessary.
    pub fn entry(&mut self, prefix: IpNetwork) -> &mut RibEntry {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.entry(prefix).or_default(),
            IpNetwork::V6(prefix) => self.ipv6.entry(prefix).or_default(),
        }
    }

    pub fn insert(
        &mut self,
        prefix: IpNetwork,
        entry: RibEntry,
    ) -> Option<RibEntry> {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.insert(prefix, entry),
            IpNetwork::V6(prefix) => self.ipv6.insert(prefix, entry),
        }
    }

    pub fn remove(&mut self, prefix: &IpNetwork) -> Option<RibEntry> {
        match prefix {
            IpNetwork::V4(prefix) => self.ipv4.remove(prefix),
            IpNetwork::V6(prefix) => self.ipv6.remove(prefix),
        }
    }

    // Returns the most specific prefix covering the given address whose entry
    // satisfies the provided filter.
    pub fn longest_prefix_match<F>(
        &self,
        addr: &IpAddr,
        filter: F,
    ) -> Option<(IpNetwork, &RibEntry)>
    where
        F: Fn(&IpNetwork, &RibEntry) -> bool,
    {
        match addr {
            IpAddr::V4(addr) => {
                let host = Ipv4Network::from(*addr);
                self.ipv4
                    .cover(&host)
                    .map(|(prefix, entry)| (IpNetwork::V4(*prefix), entry))
                    .filter(|(prefix, entry)| filter(prefix, entry))
                    .last()
            }
            IpAddr::V6(addr) => {
                let host = Ipv6Network::from(*addr);
                self.ipv6
                    .cover(&host)
                    .map(|(prefix, entry)| (IpNetwork::V6(*prefix), entry))
                    .filter(|(prefix, entry)| filter(prefix, entry))
                    .last()
            }
        }
    }

    // Returns an iterator over all entries of the given address family.
    pub fn iter_af(
        &self,
        af: AddressFamily,
    ) -> Box<dyn Iterator<Item = (IpNetwork, &RibEntry)> + '_> {
        match af {
            AddressFamily::Ipv4 => Box::new(
                self.ipv4
                    .iter()
                    .map(|(prefix, entry)| (IpNetwork::V4(*prefix), entry)),
            ),
            AddressFamily::Ipv6 => Box::new(
                self.ipv6
                    .iter()
                    .map(|(prefix, entry)| (IpNetwork::V6(*prefix), entry)),
            ),
        }
    }

    // Returns an iterator over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (IpNetwork, &RibEntry)> + '_ {
        self.iter_af(AddressFamily::Ipv4)
            .chain(self.iter_af(AddressFamily::Ipv6))
    }

    // Visits every entry of the given address family, allowing in-place
    // modification.
    pub fn visit_mut<F>(&mut self, af: AddressFamily, mut f: F)
    where
        F: FnMut(IpNetwork, &mut RibEntry),
    {
        match af {
            AddressFamily::Ipv4 => {
                for (prefix, entry) in self.ipv4.iter_mut() {
                    f(IpNetwork::V4(*prefix), entry);
                }
            }
            AddressFamily::Ipv6 => {
                for (prefix, entry) in self.ipv6.iter_mut() {
                    f(IpNetwork::V6(*prefix), entry);
                }
            }
        }
    }

    // Returns the number of prefixes in the table.
    pub fn len(&self) -> usize {
        self.ipv4.len() + self.ipv6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn route(
        &self,
        prefix: &IpNetwork,
        protocol: Protocol,
        nexthop: &IpAddr,
    ) -> Option<&Route> {
        self.get(prefix)?
            .routes
            .get(&protocol)?
            .iter()
            .find(|route| route.nexthop == *nexthop)
    }

    pub fn route_mut(
        &mut self,
        prefix: &IpNetwork,
        protocol: Protocol,
        nexthop: &IpAddr,
    ) -> Option<&mut Route> {
        self.get_mut(prefix)?
            .routes
            .get_mut(&protocol)?
            .iter_mut()
            .find(|route| route.nexthop == *nexthop)
    }

    // Appends a slot for the given route to the ordered index.
    pub fn index_push(&mut self, route: &Route) -> usize {
        let index = self.index.get_mut(route.prefix.address_family());
        index.push(DestIndex {
            prefix: route.prefix,
            protocol: route.protocol,
            nexthop: route.nexthop,
            valid: true,
        });
        index.len() - 1
    }

    // Updates the validity of a slot of the ordered index.
    pub fn index_set_valid(&mut self, route: &Route, valid: bool) {
        let index = self.index.get_mut(route.prefix.address_family());
        if let Some(slot) = index.get_mut(route.index) {
            slot.valid = valid;
        }
    }
}

// ===== impl RibEntry =====

impl RibEntry {
    pub fn reach_state(&self) -> Option<ResolvedNexthop> {
        self.selected_routes()
            .find(|route| route.is_usable())
            .map(|route| route.resolved)
    }

    // Returns an iterator over the routes of the selected protocol.
    pub fn selected_routes(&self) -> impl Iterator<Item = &Route> + '_ {
        self.selected
            .and_then(|protocol| self.routes.get(&protocol))
            .into_iter()
            .flatten()
    }

    // Returns an iterator over the installed routes.
    pub fn installed_routes(&self) -> impl Iterator<Item = &Route> + '_ {
        self.routes
            .values()
            .flatten()
            .filter(|route| route.flags.contains(RouteFlags::INSTALLED))
    }
}

// ===== impl Route =====

impl Route {
    // Returns whether this route terminates next hop resolution.
    pub fn is_terminal(&self) -> bool {
        self.nexthop.is_unspecified() || self.flags.contains(RouteFlags::NULL)
    }

    // Returns whether this route can be programmed into the FIB.
    pub fn is_usable(&self) -> bool {
        !self.flags.contains(RouteFlags::REJECTED) && self.resolved.reachable
    }

    pub fn is_installed(&self) -> bool {
        self.flags.contains(RouteFlags::INSTALLED)
    }

    pub fn policy_entity(&self) -> PolicyEntity {
        PolicyEntity::new(self.prefix, self.protocol, self.nexthop, self.metric)
    }

    // Returns the next hop programmed into the forwarding plane.
    pub fn fib_nexthop(&self) -> Nexthop {
        Nexthop {
            addr: self.resolved.addr,
            ifindex: self.resolved.ifindex,
            weight: self.weight,
        }
    }

    // Returns whether both routes share the same next hop.
    //
    // Routes of a group are keyed by next-hop address alone, so the same
    // address bound to another interface is the same next hop.
    pub fn same_nexthop(&self, other: &Route) -> bool {
        self.nexthop == other.nexthop
    }
}

// ===== impl ResolvedNexthop =====

impl ResolvedNexthop {
    pub fn new(addr: IpAddr, ifindex: u32, reachable: bool) -> Self {
        ResolvedNexthop {
            addr,
            ifindex,
            reachable,
        }
    }
}

// ===== impl RouteKey =====

impl RouteKey {
    pub fn new(
        prefix: IpNetwork,
        protocol: Protocol,
        nexthop: Option<IpAddr>,
    ) -> Self {
        RouteKey {
            prefix,
            protocol,
            nexthop,
        }
    }

    pub fn matches(&self, route: &Route) -> bool {
        self.nexthop.is_none_or(|nexthop| nexthop == route.nexthop)
    }
}

// ===== impl RouteState =====

impl RouteState {
    // Returns the key under which this route is stored in the database.
    pub fn db_key(&self) -> String {
        db_key(&self.prefix, self.protocol, &self.nexthop)
    }
}

// ===== global functions =====

pub fn db_key(
    prefix: &IpNetwork,
    protocol: Protocol,
    nexthop: &IpAddr,
) -> String {
    format!("{}|{}|{}", prefix, protocol, nexthop)
}
