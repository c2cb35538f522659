//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_utils::Responder;
use ribd_utils::ibus::IbusSubscriber;
use ribd_utils::ip::AddressFamily;
use ribd_utils::policy::{DefaultPolicyType, MatchSets, Policy, PolicyType};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::{AddressMsg, InterfaceUpdateMsg};

use crate::Master;
use crate::admission::{RouteOp, RouteRequest};
use crate::bulk::BulkInfo;
use crate::collaborator::{CollaboratorKind, CollaboratorStatus};
use crate::distance::DistanceState;
use crate::error::Error;
use crate::interface::InterfaceState;
use crate::rib::RouteState;

// Messages processed by the route-processing loop.
#[derive(Debug)]
pub enum RibMsg {
    // Route admission.
    Route {
        op: RouteOp,
        req: RouteRequest,
        responder: Option<Responder<Result<bool, Error>>>,
    },
    // Interface events.
    InterfaceUpd(InterfaceUpdateMsg),
    InterfaceDel(String),
    InterfaceAddressAdd(AddressMsg),
    InterfaceAddressDel(AddressMsg),
    // Policy configuration.
    PolicyUpd(Policy),
    PolicyDel {
        name: String,
        responder: Responder<Result<(), Error>>,
    },
    PolicyMatchSetsUpd(MatchSets),
    PolicyApply {
        name: String,
        policy_type: PolicyType,
        responder: Responder<Result<(), Error>>,
    },
    PolicyUnapply {
        name: String,
        policy_type: PolicyType,
        responder: Responder<Result<(), Error>>,
    },
    PolicyDefaultSet {
        policy_type: PolicyType,
        default: DefaultPolicyType,
    },
    // Notification subscriptions.
    Subscribe {
        protocol: Protocol,
        subscriber: IbusSubscriber,
    },
    Unsubscribe(usize),
    NexthopTrack {
        protocol: Protocol,
        addr: IpAddr,
    },
    NexthopUntrack {
        protocol: Protocol,
        addr: IpAddr,
    },
    // State queries.
    GetRoutes {
        af: AddressFamily,
        from: usize,
        count: usize,
        responder: Responder<BulkInfo<RouteState>>,
    },
    GetProtocolRoutes {
        protocol: Protocol,
        from: usize,
        count: usize,
        responder: Responder<BulkInfo<RouteState>>,
    },
    GetPrefixRoutes {
        prefix: IpNetwork,
        responder: Responder<Vec<RouteState>>,
    },
    GetInterfaces {
        from: usize,
        count: usize,
        responder: Responder<BulkInfo<InterfaceState>>,
    },
    GetDistances {
        responder: Responder<Vec<DistanceState>>,
    },
}

// ===== global functions =====

pub(crate) fn process_msg(master: &mut Master, msg: RibMsg) {
    match msg {
        RibMsg::Route { op, req, responder } => {
            master.route_process(op, req, responder);
        }
        RibMsg::InterfaceUpd(msg) => {
            let ifindex = msg.ifindex;
            match master.interfaces.update(msg) {
                Some(true) => {
                    master.rib.link_up(
                        ifindex,
                        &master.policy,
                        &mut master.fib,
                    );
                }
                Some(false) => {
                    master.rib.link_down(
                        ifindex,
                        &master.policy,
                        &mut master.fib,
                    );
                }
                None => (),
            }
        }
        RibMsg::InterfaceDel(ifname) => {
            let Some(iface) = master.interfaces.get_by_name(&ifname) else {
                return;
            };
            let ifindex = iface.ifindex;
            let addrs = iface.addresses.iter().copied().collect::<Vec<_>>();

            // Remove the connected routes of the interface and take down
            // the routes egressing through it.
            for addr in addrs {
                master.rib.connected_route_del(
                    addr,
                    ifindex,
                    &master.policy,
                    &mut master.fib,
                );
            }
            master.rib.link_down(ifindex, &master.policy, &mut master.fib);
            master.interfaces.remove(&ifname);
        }
        RibMsg::InterfaceAddressAdd(msg) => {
            if let Some((ifindex, operative)) =
                master.interfaces.addr_add(&msg.ifname, msg.addr)
            {
                master.rib.connected_route_add(
                    msg.addr,
                    ifindex,
                    operative,
                    &master.policy,
                    &mut master.fib,
                );
            }
        }
        RibMsg::InterfaceAddressDel(msg) => {
            if let Some(ifindex) =
                master.interfaces.addr_del(&msg.ifname, msg.addr)
            {
                master.rib.connected_route_del(
                    msg.addr,
                    ifindex,
                    &master.policy,
                    &mut master.fib,
                );
            }
        }
        RibMsg::PolicyUpd(policy) => {
            let _ = master.policy_op(|engine, bridge| {
                engine.policy_update(policy, bridge);
                Ok(())
            });
        }
        RibMsg::PolicyDel { name, responder } => {
            let result = master.policy_op(|engine, bridge| {
                engine.policy_remove(&name, bridge)
            });
            let _ = responder.send(result);
        }
        RibMsg::PolicyMatchSetsUpd(match_sets) => {
            let _ = master.policy_op(|engine, bridge| {
                engine.match_sets_update(match_sets, bridge);
                Ok(())
            });
        }
        RibMsg::PolicyApply {
            name,
            policy_type,
            responder,
        } => {
            let result = master.policy_op(|engine, bridge| {
                engine.policy_apply(&name, policy_type, bridge)
            });
            let _ = responder.send(result);
        }
        RibMsg::PolicyUnapply {
            name,
            policy_type,
            responder,
        } => {
            let result = master.policy_op(|engine, bridge| {
                engine.policy_unapply(&name, policy_type, bridge)
            });
            let _ = responder.send(result);
        }
        RibMsg::PolicyDefaultSet {
            policy_type,
            default,
        } => {
            let cfg = match policy_type {
                PolicyType::Import => &mut master.policy.import,
                PolicyType::Export => &mut master.policy.export,
            };
            if cfg.default != default {
                cfg.default = default;
                master.rib.policy_reevaluate(&master.policy, &mut master.fib);
            }
        }
        RibMsg::Subscribe {
            protocol,
            subscriber,
        } => {
            master.fib.subscribe(protocol, subscriber);
        }
        RibMsg::Unsubscribe(id) => {
            master.fib.unsubscribe(id);
        }
        RibMsg::NexthopTrack { protocol, addr } => {
            master.rib.nexthop_track(protocol, addr, &mut master.fib);
        }
        RibMsg::NexthopUntrack { protocol, addr } => {
            master.rib.nexthop_untrack(protocol, addr);
        }
        RibMsg::GetRoutes {
            af,
            from,
            count,
            responder,
        } => {
            let _ = responder.send(master.rib.routes_bulk(af, from, count));
        }
        RibMsg::GetProtocolRoutes {
            protocol,
            from,
            count,
            responder,
        } => {
            let routes = master.rib.protocol_routes_bulk(protocol, from, count);
            let _ = responder.send(routes);
        }
        RibMsg::GetPrefixRoutes { prefix, responder } => {
            let _ = responder.send(master.rib.prefix_states(&prefix));
        }
        RibMsg::GetInterfaces {
            from,
            count,
            responder,
        } => {
            let _ = responder.send(master.interfaces.bulk(from, count));
        }
        RibMsg::GetDistances { responder } => {
            let _ = responder.send(master.rib.distances.states());
        }
    }
}

// Processes a collaborator connectivity change.
//
// A collaborator coming back up is re-primed with the current state.
pub(crate) fn process_status(master: &mut Master, status: CollaboratorStatus) {
    if !master.fib.set_status(status.kind, status.up) {
        return;
    }

    match status.kind {
        CollaboratorKind::Asic => {
            let routes = master
                .rib
                .table
                .iter()
                .flat_map(|(_, entry)| entry.installed_routes())
                .cloned()
                .collect::<Vec<_>>();
            master.fib.resync(&routes);
        }
        CollaboratorKind::Arp => {
            let nexthops = master
                .rib
                .deps
                .arp_iter()
                .map(|(addr, aref)| (*addr, aref.ifindex))
                .collect::<Vec<_>>();
            for (addr, ifindex) in nexthops {
                master.fib.arp_resolve(addr, ifindex);
            }
        }
    }
}
