//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ribd_utils::ip::AddressFamily;
use ribd_utils::protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::rib::{DestIndex, Rib, RouteState};

// Page of a cursor-based bulk retrieval.
//
// `end_idx` is the cursor to use in the next request. When `more` is false
// for a nonzero count, a request starting at `end_idx` returns no items.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BulkInfo<T> {
    pub start_idx: usize,
    pub end_idx: usize,
    pub count: usize,
    pub more: bool,
    pub items: Vec<T>,
}

// ===== impl Rib =====

impl Rib {
    // Returns a page of routes of the given address family, in index order.
    pub fn routes_bulk(
        &self,
        af: AddressFamily,
        from: usize,
        count: usize,
    ) -> BulkInfo<RouteState> {
        let slots = self.table.index.get(af).iter().collect::<Vec<_>>();
        get_bulk(&slots, from, count, |slot| self.slot_state(slot))
    }

    // Returns a page of the routes of the given protocol across both address
    // families. IPv4 slots come first.
    pub fn protocol_routes_bulk(
        &self,
        protocol: Protocol,
        from: usize,
        count: usize,
    ) -> BulkInfo<RouteState> {
        let slots = self
            .table
            .index
            .iter()
            .flat_map(|(_, slots)| slots.iter())
            .collect::<Vec<_>>();
        get_bulk(&slots, from, count, |slot| {
            if slot.protocol != protocol {
                return None;
            }
            self.slot_state(slot)
        })
    }

    fn slot_state(&self, slot: &DestIndex) -> Option<RouteState> {
        if !slot.valid {
            return None;
        }
        self.table
            .route(&slot.prefix, slot.protocol, &slot.nexthop)
            .map(|route| self.route_state(route))
    }
}

// ===== global functions =====

// Collects up to `count` items starting at the `from` slot.
//
// Slots for which `f` returns `None` are skipped. The returned cursor points
// at the slot holding the next item, or past the end if there is none.
//
// A zero count requests no page: the cursor stays put and `more` is unset.
pub fn get_bulk<I, T, F>(
    slots: &[I],
    from: usize,
    count: usize,
    mut f: F,
) -> BulkInfo<T>
where
    F: FnMut(&I) -> Option<T>,
{
    if count == 0 {
        return BulkInfo {
            start_idx: from,
            end_idx: from,
            count: 0,
            more: false,
            items: vec![],
        };
    }

    let mut items = vec![];
    let mut idx = from;
    while idx < slots.len() {
        let item = f(&slots[idx]);
        if item.is_some() && items.len() == count {
            break;
        }
        items.extend(item);
        idx += 1;
    }

    BulkInfo {
        start_idx: from,
        end_idx: idx,
        count: items.len(),
        more: idx < slots.len(),
        items,
    }
}

// ===== unit tests =====
