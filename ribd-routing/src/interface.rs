//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};

use generational_arena::{Arena, Index};
use ipnetwork::IpNetwork;
use ribd_utils::southbound::{InterfaceFlags, InterfaceUpdateMsg};
use serde::{Deserialize, Serialize};

use crate::bulk::{BulkInfo, get_bulk};

#[derive(Debug, Default)]
pub struct Interfaces {
    // Interface arena.
    arena: Arena<Interface>,
    // Interface binary tree keyed by name (1:1).
    name_tree: BTreeMap<String, Index>,
    // Interface hash table keyed by ifindex (1:1).
    ifindex_tree: HashMap<u32, Index>,
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub flags: InterfaceFlags,
    pub addresses: BTreeSet<IpNetwork>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceState {
    pub ifname: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub operative: bool,
    pub addresses: Vec<IpNetwork>,
}

// ===== impl Interfaces =====

impl Interfaces {
    // Adds or updates the interface with the specified attributes.
    //
    // Returns the new operational status if it has changed.
    pub(crate) fn update(&mut self, msg: InterfaceUpdateMsg) -> Option<bool> {
        let operative = msg.flags.contains(InterfaceFlags::OPERATIVE);
        match self.ifindex_tree.get(&msg.ifindex).copied() {
            Some(iface_idx) => {
                let iface = &mut self.arena[iface_idx];
                let old_operative = iface.is_operative();

                // Update the existing interface with the new information.
                if iface.name != msg.ifname {
                    self.name_tree.remove(&iface.name);
                    iface.name.clone_from(&msg.ifname);
                    self.name_tree.insert(msg.ifname, iface_idx);
                }
                iface.mtu = msg.mtu;
                iface.flags = msg.flags;

                (old_operative != operative).then_some(operative)
            }
            None => {
                // If the interface does not exist, create a new entry.
                let iface = Interface {
                    name: msg.ifname.clone(),
                    ifindex: msg.ifindex,
                    mtu: msg.mtu,
                    flags: msg.flags,
                    addresses: Default::default(),
                };

                let iface_idx = self.arena.insert(iface);
                self.name_tree.insert(msg.ifname, iface_idx);
                self.ifindex_tree.insert(msg.ifindex, iface_idx);

                operative.then_some(true)
            }
        }
    }

    // Removes the specified interface identified by its name.
    pub(crate) fn remove(&mut self, ifname: &str) -> Option<Interface> {
        let iface_idx = self.name_tree.remove(ifname)?;
        let iface = self.arena.remove(iface_idx)?;
        self.ifindex_tree.remove(&iface.ifindex);
        Some(iface)
    }

    // Adds the specified address to the interface identified by its name.
    //
    // Returns the interface's ifindex and operational status.
    pub(crate) fn addr_add(
        &mut self,
        ifname: &str,
        addr: IpNetwork,
    ) -> Option<(u32, bool)> {
        // Ignore loopback addresses.
        if addr.ip().is_loopback() {
            return None;
        }

        let iface = self.get_mut_by_name(ifname)?;
        iface.addresses.insert(addr);
        Some((iface.ifindex, iface.is_operative()))
    }

    // Removes the specified address from the interface identified by its name.
    //
    // Returns the interface's ifindex if the address was present.
    pub(crate) fn addr_del(
        &mut self,
        ifname: &str,
        addr: IpNetwork,
    ) -> Option<u32> {
        let iface = self.get_mut_by_name(ifname)?;
        iface.addresses.remove(&addr).then_some(iface.ifindex)
    }

    // Returns a reference to the interface corresponding to the given name.
    pub fn get_by_name(&self, ifname: &str) -> Option<&Interface> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| &self.arena[iface_idx])
    }

    // Returns a mutable reference to the interface corresponding to the given
    // name.
    pub(crate) fn get_mut_by_name(
        &mut self,
        ifname: &str,
    ) -> Option<&mut Interface> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| &mut self.arena[iface_idx])
    }

    // Returns a reference to the interface corresponding to the given ifindex.
    pub fn get_by_ifindex(&self, ifindex: u32) -> Option<&Interface> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(|iface_idx| &self.arena[iface_idx])
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Interface> + '_ {
        self.name_tree
            .values()
            .map(|iface_idx| &self.arena[*iface_idx])
    }

    // Returns a page of interface states, ordered by name.
    pub fn bulk(&self, from: usize, count: usize) -> BulkInfo<InterfaceState> {
        let ifaces = self.iter().collect::<Vec<_>>();
        get_bulk(&ifaces, from, count, |iface| Some(iface.state()))
    }
}

// ===== impl Interface =====

impl Interface {
    pub fn is_operative(&self) -> bool {
        self.flags.contains(InterfaceFlags::OPERATIVE)
    }

    pub fn state(&self) -> InterfaceState {
        InterfaceState {
            ifname: self.name.clone(),
            ifindex: self.ifindex,
            mtu: self.mtu,
            operative: self.is_operative(),
            addresses: self.addresses.iter().copied().collect(),
        }
    }
}
