//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct InterfaceFlags: u8 {
        const LOOPBACK = 0x01;
        const OPERATIVE = 0x02;
        const BROADCAST = 0x04;
    }
}

// Next hop of a route programmed into the forwarding plane.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    pub addr: IpAddr,
    pub ifindex: u32,
    pub weight: u32,
}

// ===== Route admission =====

// Route as submitted by a routing protocol daemon.
//
// The destination and the mask are kept separate as received on the wire.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct ProtocolRoute {
    pub protocol: String,
    pub destination: IpAddr,
    pub mask: IpAddr,
    pub nexthops: Vec<NexthopCfg>,
    pub metric: u32,
    #[new(default)]
    #[serde(default)]
    pub null_route: bool,
}

// Next hop as submitted by a routing protocol daemon.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct NexthopCfg {
    pub addr: IpAddr,
    #[new(default)]
    #[serde(default)]
    pub ifname: Option<String>,
    #[new(default)]
    #[serde(default)]
    pub ifindex: Option<u32>,
    #[new(value = "1")]
    #[serde(default = "NexthopCfg::default_weight")]
    pub weight: u32,
}

// ===== Interface events =====

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceUpdateMsg {
    pub ifname: String,
    pub ifindex: u32,
    pub mtu: u32,
    pub flags: InterfaceFlags,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AddressMsg {
    pub ifname: String,
    pub addr: IpNetwork,
}

// ===== Redistribution =====

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub distance: u32,
    pub metric: u32,
    pub nexthops: BTreeSet<Nexthop>,
    pub network_statement: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
}

// ===== impl NexthopCfg =====

impl NexthopCfg {
    fn default_weight() -> u32 {
        1
    }

    // Builds a next hop bound to the given interface name.
    pub fn with_ifname(addr: IpAddr, ifname: impl Into<String>) -> Self {
        let mut nexthop = NexthopCfg::new(addr);
        nexthop.ifname = Some(ifname.into());
        nexthop
    }
}

// ===== global functions =====

// Returns the sentinel next hop that null routes must carry.
pub fn null_route_nexthop(ipv4: bool) -> IpAddr {
    if ipv4 {
        IpAddr::V4(Ipv4Addr::BROADCAST)
    } else {
        IpAddr::V6(Ipv6Addr::from(u128::MAX))
    }
}

// Returns whether the given address is the null route sentinel.
pub fn is_null_route_nexthop(addr: &IpAddr) -> bool {
    *addr == null_route_nexthop(addr.is_ipv4())
}
