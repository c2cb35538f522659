//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, IpNetworkError, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Container for storing separate values for IPv4 and IPv6.
#[derive(Debug, Default)]
pub struct AddressFamilies<T> {
    pub ipv4: T,
    pub ipv6: T,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of this address.
    fn address_family(&self) -> AddressFamily;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Returns the address family of this prefix.
    fn address_family(&self) -> AddressFamily;

    // Returns a copy of this prefix with the host bits cleared.
    fn apply_mask(&self) -> IpNetwork;

    // Returns true if the prefix has host bits set.
    fn has_host_bits(&self) -> bool;

    // Returns the first and last addresses covered by this prefix.
    fn addr_range(&self) -> (IpAddr, IpAddr);
}

// ===== impl AddressFamily =====

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl AddressFamilies =====

impl<T> AddressFamilies<T> {
    // Returns a reference to the value corresponding to the given address
    // family.
    pub fn get(&self, af: AddressFamily) -> &T {
        match af {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    // Returns a mutable reference to the value corresponding to the given
    // address family.
    pub fn get_mut(&mut self, af: AddressFamily) -> &mut T {
        match af {
            AddressFamily::Ipv4 => &mut self.ipv4,
            AddressFamily::Ipv6 => &mut self.ipv6,
        }
    }

    // Returns an iterator over immutable references to all address family
    // values.
    pub fn iter(&self) -> impl Iterator<Item = (AddressFamily, &T)> {
        [
            (AddressFamily::Ipv4, &self.ipv4),
            (AddressFamily::Ipv6, &self.ipv6),
        ]
        .into_iter()
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(prefix) => IpNetwork::V4(
                Ipv4Network::new(prefix.network(), prefix.prefix())
                    .unwrap_or(*prefix),
            ),
            IpNetwork::V6(prefix) => IpNetwork::V6(
                Ipv6Network::new(prefix.network(), prefix.prefix())
                    .unwrap_or(*prefix),
            ),
        }
    }

    fn has_host_bits(&self) -> bool {
        self.ip() != self.network()
    }

    fn addr_range(&self) -> (IpAddr, IpAddr) {
        (self.network(), self.broadcast())
    }
}

// ===== global functions =====

// Builds a prefix out of a destination address and a dotted (or IPv6) netmask.
//
// The netmask must belong to the same address family as the destination and
// must be contiguous.
pub fn prefix_from_mask(
    addr: IpAddr,
    mask: IpAddr,
) -> Result<IpNetwork, IpNetworkError> {
    if addr.address_family() != mask.address_family() {
        return Err(IpNetworkError::InvalidPrefix);
    }
    let plen = ipnetwork::ip_mask_to_prefix(mask)?;
    IpNetwork::new(addr, plen)
}

// ===== unit tests =====
