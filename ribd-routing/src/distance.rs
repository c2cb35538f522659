//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::OnceCell;
use std::collections::BTreeMap;

use itertools::Itertools;
use ribd_utils::protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;

// Administrative distance of every known protocol.
#[derive(Debug)]
pub struct AdminDistances {
    entries: BTreeMap<Protocol, DistanceEntry>,
    // Protocols sorted by preference, built on demand.
    ranked: OnceCell<Vec<Protocol>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DistanceEntry {
    pub default: u32,
    pub configured: Option<u32>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DistanceState {
    pub protocol: Protocol,
    pub default: u32,
    pub configured: Option<u32>,
    pub effective: u32,
}

// ===== impl AdminDistances =====

impl AdminDistances {
    pub fn default_distance(protocol: Protocol) -> u32 {
        match protocol {
            Protocol::CONNECTED => 0,
            Protocol::STATIC => 1,
            Protocol::EBGP => 20,
            Protocol::OSPF => 110,
            Protocol::IBGP => 200,
        }
    }

    // Returns the configured distance if set, or the default one otherwise.
    pub fn effective(&self, protocol: Protocol) -> u32 {
        self.entries
            .get(&protocol)
            .map(|entry| entry.effective())
            .unwrap_or_else(|| Self::default_distance(protocol))
    }

    pub fn default_of(&self, protocol: Protocol) -> u32 {
        self.entries
            .get(&protocol)
            .map(|entry| entry.default)
            .unwrap_or_else(|| Self::default_distance(protocol))
    }

    // Returns the key used to compare protocols: lower is better.
    pub fn preference(&self, protocol: Protocol) -> (u32, u32) {
        (self.effective(protocol), self.default_of(protocol))
    }

    // Returns all protocols ordered by effective distance, ties broken by
    // default distance.
    pub fn ranked(&self) -> &[Protocol] {
        self.ranked.get_or_init(|| {
            self.entries
                .keys()
                .copied()
                .sorted_by_key(|protocol| self.preference(*protocol))
                .collect()
        })
    }

    // Configures the distance of the given protocol.
    //
    // Returns whether the effective distance changed.
    pub fn set(&mut self, protocol: Protocol, distance: u32) -> bool {
        let old = self.effective(protocol);
        if let Some(entry) = self.entries.get_mut(&protocol) {
            entry.configured = Some(distance);
        }
        self.ranked.take();

        let changed = old != distance;
        if changed {
            Debug::DistanceChange(protocol, distance).log();
        }
        changed
    }

    // Reverts the distance of the given protocol to its default value.
    //
    // Returns whether the effective distance changed.
    pub fn unset(&mut self, protocol: Protocol) -> bool {
        let old = self.effective(protocol);
        if let Some(entry) = self.entries.get_mut(&protocol) {
            entry.configured = None;
        }
        self.ranked.take();

        let new = self.effective(protocol);
        if old != new {
            Debug::DistanceChange(protocol, new).log();
        }
        old != new
    }

    pub fn states(&self) -> Vec<DistanceState> {
        self.ranked()
            .iter()
            .map(|protocol| {
                let entry = self.entries[protocol];
                DistanceState {
                    protocol: *protocol,
                    default: entry.default,
                    configured: entry.configured,
                    effective: entry.effective(),
                }
            })
            .collect()
    }
}

impl Default for AdminDistances {
    fn default() -> AdminDistances {
        let entries = Protocol::ALL
            .into_iter()
            .map(|protocol| {
                let entry = DistanceEntry {
                    default: Self::default_distance(protocol),
                    configured: None,
                };
                (protocol, entry)
            })
            .collect();
        AdminDistances {
            entries,
            ranked: OnceCell::new(),
        }
    }
}

// ===== impl DistanceEntry =====

impl DistanceEntry {
    pub fn effective(&self) -> u32 {
        self.configured.unwrap_or(self.default)
    }
}

// ===== unit tests =====
