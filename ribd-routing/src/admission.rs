//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::str::FromStr;

use chrono::Utc;
use ipnetwork::IpNetwork;
use ribd_utils::ibus::{Notification, subscriber_channel};
use ribd_utils::ip::{AddressFamily, IpNetworkExt, prefix_from_mask};
use ribd_utils::policy::{DefaultPolicyType, MatchSets, Policy, PolicyType};
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::{
    AddressMsg, InterfaceUpdateMsg, NexthopCfg, ProtocolRoute,
    is_null_route_nexthop,
};
use ribd_utils::{Responder, Sender, UnboundedReceiver};
use tokio::sync::oneshot;

use crate::Master;
use crate::bulk::BulkInfo;
use crate::distance::DistanceState;
use crate::error::{Error, ResolveError, ValidationError};
use crate::ibus::RibMsg;
use crate::interface::InterfaceState;
use crate::rib::{ResolvedNexthop, Route, RouteFlags, RouteKey, RouteState};
use crate::selection::DeleteScope;

// Client handle used by routing protocol daemons to reach the RIB.
#[derive(Clone, Debug)]
pub struct RibHandle {
    tx: Sender<RibMsg>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteOp {
    Create,
    Update,
    Delete,
}

// Route request that passed stateless validation.
#[derive(Clone, Debug)]
pub struct RouteRequest {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub nexthops: Vec<NexthopCfg>,
    pub metric: u32,
    pub null_route: bool,
    // Program IPv4 routes in bulk.
    pub bulk: bool,
}

// RIB mutation resulting from an accepted route request.
#[derive(Debug)]
enum RouteAction {
    Add { routes: Vec<Route>, replace: bool },
    Del(Vec<RouteKey>),
}

// ===== impl RibHandle =====

impl RibHandle {
    pub fn new(tx: Sender<RibMsg>) -> Self {
        RibHandle { tx }
    }

    pub async fn create_route(
        &self,
        route: &ProtocolRoute,
    ) -> Result<bool, Error> {
        self.route_request(route, RouteOp::Create, false).await
    }

    pub async fn update_route(
        &self,
        route: &ProtocolRoute,
    ) -> Result<bool, Error> {
        self.route_request(route, RouteOp::Update, false).await
    }

    pub async fn delete_route(
        &self,
        route: &ProtocolRoute,
    ) -> Result<bool, Error> {
        self.route_request(route, RouteOp::Delete, false).await
    }

    // Creates several routes, programming the IPv4 ones in bulk.
    pub async fn create_routes_bulk(
        &self,
        routes: &[ProtocolRoute],
    ) -> Vec<Result<bool, Error>> {
        let mut results = Vec::with_capacity(routes.len());
        for route in routes {
            results
                .push(self.route_request(route, RouteOp::Create, true).await);
        }
        results
    }

    pub async fn interface_update(
        &self,
        msg: InterfaceUpdateMsg,
    ) -> Result<(), Error> {
        self.send(RibMsg::InterfaceUpd(msg)).await
    }

    pub async fn interface_delete(&self, ifname: String) -> Result<(), Error> {
        self.send(RibMsg::InterfaceDel(ifname)).await
    }

    pub async fn address_add(&self, msg: AddressMsg) -> Result<(), Error> {
        self.send(RibMsg::InterfaceAddressAdd(msg)).await
    }

    pub async fn address_delete(&self, msg: AddressMsg) -> Result<(), Error> {
        self.send(RibMsg::InterfaceAddressDel(msg)).await
    }

    pub async fn policy_update(&self, policy: Policy) -> Result<(), Error> {
        self.send(RibMsg::PolicyUpd(policy)).await
    }

    pub async fn policy_delete(&self, name: &str) -> Result<(), Error> {
        let name = name.to_owned();
        self.request(|responder| RibMsg::PolicyDel { name, responder })
            .await?
    }

    pub async fn match_sets_update(
        &self,
        match_sets: MatchSets,
    ) -> Result<(), Error> {
        self.send(RibMsg::PolicyMatchSetsUpd(match_sets)).await
    }

    pub async fn policy_apply(
        &self,
        name: &str,
        policy_type: PolicyType,
    ) -> Result<(), Error> {
        let name = name.to_owned();
        self.request(|responder| RibMsg::PolicyApply {
            name,
            policy_type,
            responder,
        })
        .await?
    }

    pub async fn policy_unapply(
        &self,
        name: &str,
        policy_type: PolicyType,
    ) -> Result<(), Error> {
        let name = name.to_owned();
        self.request(|responder| RibMsg::PolicyUnapply {
            name,
            policy_type,
            responder,
        })
        .await?
    }

    pub async fn policy_default_set(
        &self,
        policy_type: PolicyType,
        default: DefaultPolicyType,
    ) -> Result<(), Error> {
        self.send(RibMsg::PolicyDefaultSet {
            policy_type,
            default,
        })
        .await
    }

    // Subscribes to the notifications addressed to the given protocol.
    //
    // Returns the subscriber identifier along with the notification stream.
    pub async fn subscribe(
        &self,
        protocol: Protocol,
    ) -> Result<(usize, UnboundedReceiver<Notification>), Error> {
        let (subscriber, rx) = subscriber_channel();
        let id = subscriber.id;
        self.send(RibMsg::Subscribe {
            protocol,
            subscriber,
        })
        .await?;
        Ok((id, rx))
    }

    pub async fn unsubscribe(&self, id: usize) -> Result<(), Error> {
        self.send(RibMsg::Unsubscribe(id)).await
    }

    pub async fn nexthop_track(
        &self,
        protocol: Protocol,
        addr: IpAddr,
    ) -> Result<(), Error> {
        self.send(RibMsg::NexthopTrack { protocol, addr }).await
    }

    pub async fn nexthop_untrack(
        &self,
        protocol: Protocol,
        addr: IpAddr,
    ) -> Result<(), Error> {
        self.send(RibMsg::NexthopUntrack { protocol, addr }).await
    }

    pub async fn get_bulk_routes(
        &self,
        af: AddressFamily,
        from: usize,
        count: usize,
    ) -> Result<BulkInfo<RouteState>, Error> {
        self.request(|responder| RibMsg::GetRoutes {
            af,
            from,
            count,
            responder,
        })
        .await
    }

    pub async fn get_routes_for_protocol(
        &self,
        protocol: Protocol,
        from: usize,
        count: usize,
    ) -> Result<BulkInfo<RouteState>, Error> {
        self.request(|responder| RibMsg::GetProtocolRoutes {
            protocol,
            from,
            count,
            responder,
        })
        .await
    }

    pub async fn get_prefix_routes(
        &self,
        prefix: IpNetwork,
    ) -> Result<Vec<RouteState>, Error> {
        self.request(|responder| RibMsg::GetPrefixRoutes { prefix, responder })
            .await
    }

    pub async fn get_bulk_interfaces(
        &self,
        from: usize,
        count: usize,
    ) -> Result<BulkInfo<InterfaceState>, Error> {
        self.request(|responder| RibMsg::GetInterfaces {
            from,
            count,
            responder,
        })
        .await
    }

    pub async fn get_admin_distances(
        &self,
    ) -> Result<Vec<DistanceState>, Error> {
        self.request(|responder| RibMsg::GetDistances { responder })
            .await
    }

    async fn route_request(
        &self,
        route: &ProtocolRoute,
        op: RouteOp,
        bulk: bool,
    ) -> Result<bool, Error> {
        let mut req = RouteRequest::validate(route, op)?;
        req.bulk = bulk;
        self.request(|responder| RibMsg::Route {
            op,
            req,
            responder: Some(responder),
        })
        .await?
    }

    async fn send(&self, msg: RibMsg) -> Result<(), Error> {
        self.tx.send(msg).await.map_err(|_| Error::ChannelClosed)
    }

    async fn request<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(Responder<T>) -> RibMsg,
    {
        let (responder, rx) = oneshot::channel();
        self.send(f(responder)).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

// ===== impl RouteRequest =====

impl RouteRequest {
    // Checks a route submitted by a routing protocol daemon, independently
    // of the RIB contents.
    pub fn validate(
        route: &ProtocolRoute,
        op: RouteOp,
    ) -> Result<RouteRequest, ValidationError> {
        let protocol = Protocol::from_str(&route.protocol).map_err(|_| {
            ValidationError::UnknownProtocol(route.protocol.clone())
        })?;
        if protocol == Protocol::CONNECTED {
            return Err(ValidationError::ConnectedProtocol);
        }

        let prefix = prefix_from_mask(route.destination, route.mask)
            .map_err(|_| {
                ValidationError::InvalidPrefix(route.destination, route.mask)
            })?
            .apply_mask();

        if route.nexthops.is_empty() && op != RouteOp::Delete {
            return Err(ValidationError::MissingNexthops);
        }

        let mut nexthops: Vec<NexthopCfg> = vec![];
        for nexthop in &route.nexthops {
            if nexthop.addr.is_ipv4() != prefix.is_ipv4() {
                return Err(ValidationError::FamilyMismatch(
                    prefix,
                    nexthop.addr,
                ));
            }
            if (nexthop.addr.is_multicast()
                && !is_null_route_nexthop(&nexthop.addr))
                || (nexthop.addr.is_unspecified()
                    && nexthop.ifname.is_none()
                    && nexthop.ifindex.is_none())
            {
                return Err(ValidationError::InvalidNexthop(nexthop.addr));
            }

            // Ignore repeated next hops. The first interface binding of an
            // address wins.
            if !nexthops.iter().any(|nh| nh.addr == nexthop.addr) {
                nexthops.push(nexthop.clone());
            }
        }

        // Null routes carry the sentinel next hop and nothing else.
        let null_nexthops = nexthops
            .iter()
            .filter(|nexthop| is_null_route_nexthop(&nexthop.addr))
            .count();
        if op != RouteOp::Delete
            && ((route.null_route && null_nexthops != nexthops.len())
                || (null_nexthops != 0 && null_nexthops != nexthops.len()))
        {
            return Err(ValidationError::InvalidNullRoute(prefix));
        }
        let null_route =
            !nexthops.is_empty() && null_nexthops == nexthops.len();

        Ok(RouteRequest {
            protocol,
            prefix,
            nexthops,
            metric: route.metric,
            null_route,
            bulk: false,
        })
    }
}

// ===== impl Master =====

impl Master {
    // Processes a validated route request.
    //
    // The outcome of the stateful checks is reported before the RIB is
    // modified.
    pub(crate) fn route_process(
        &mut self,
        op: RouteOp,
        req: RouteRequest,
        responder: Option<Responder<Result<bool, Error>>>,
    ) {
        let action = match self.route_check(op, &req) {
            Ok(action) => action,
            Err(error) => {
                match responder {
                    Some(responder) => {
                        let _ = responder.send(Err(error.into()));
                    }
                    None => error.log(),
                }
                return;
            }
        };
        if let Some(responder) = responder {
            let _ = responder.send(Ok(true));
        }

        self.fib.bulk = req.bulk;
        match action {
            RouteAction::Add { routes, replace } => {
                self.rib.route_group_add(
                    req.prefix,
                    req.protocol,
                    routes,
                    replace,
                    &self.policy,
                    &mut self.fib,
                );
            }
            RouteAction::Del(keys) => {
                for key in keys {
                    self.rib.route_del(
                        key,
                        DeleteScope::FibAndRib,
                        &self.policy,
                        &mut self.fib,
                    );
                }
            }
        }
        self.fib.bulk = false;
    }

    // Checks a route request against the current RIB contents.
    fn route_check(
        &self,
        op: RouteOp,
        req: &RouteRequest,
    ) -> Result<RouteAction, ValidationError> {
        let group = self
            .rib
            .table
            .get(&req.prefix)
            .and_then(|entry| entry.routes.get(&req.protocol))
            .filter(|group| !group.is_empty());

        match op {
            RouteOp::Create => {
                let routes = self.route_build(req)?;
                if let Some(group) = group {
                    let group_metric =
                        group.first().map(|route| route.metric).unwrap_or(0);
                    for route in &routes {
                        let existing =
                            group.iter().find(|r| r.same_nexthop(route));
                        match existing {
                            Some(existing)
                                if route.metric >= existing.metric =>
                            {
                                return Err(ValidationError::DuplicateRoute(
                                    req.prefix,
                                    req.protocol,
                                ));
                            }
                            None if route.metric > group_metric => {
                                return Err(ValidationError::WorseMetric(
                                    req.prefix,
                                    req.protocol,
                                    route.metric,
                                ));
                            }
                            _ => (),
                        }
                    }
                }
                Ok(RouteAction::Add {
                    routes,
                    replace: false,
                })
            }
            RouteOp::Update => {
                if group.is_none() {
                    return Err(ValidationError::RouteNotFound(
                        req.prefix,
                        req.protocol,
                    ));
                }
                let routes = self.route_build(req)?;
                Ok(RouteAction::Add {
                    routes,
                    replace: true,
                })
            }
            RouteOp::Delete => {
                let Some(group) = group else {
                    return Err(ValidationError::RouteNotFound(
                        req.prefix,
                        req.protocol,
                    ));
                };
                if req.nexthops.is_empty() {
                    let key = RouteKey::new(req.prefix, req.protocol, None);
                    return Ok(RouteAction::Del(vec![key]));
                }
                let keys = req
                    .nexthops
                    .iter()
                    .filter(|nexthop| {
                        group.iter().any(|route| route.nexthop == nexthop.addr)
                    })
                    .map(|nexthop| {
                        RouteKey::new(
                            req.prefix,
                            req.protocol,
                            Some(nexthop.addr),
                        )
                    })
                    .collect::<Vec<_>>();
                if keys.is_empty() {
                    return Err(ValidationError::RouteNotFound(
                        req.prefix,
                        req.protocol,
                    ));
                }
                Ok(RouteAction::Del(keys))
            }
        }
    }

    // Builds the routes described by a request, one per next hop.
    fn route_build(
        &self,
        req: &RouteRequest,
    ) -> Result<Vec<Route>, ValidationError> {
        let now = Utc::now();
        let mut routes = vec![];
        for nexthop in &req.nexthops {
            // Lookup the egress interface.
            let (ifindex, operative) = match (&nexthop.ifname, nexthop.ifindex)
            {
                (Some(ifname), _) => self
                    .interfaces
                    .get_by_name(ifname)
                    .map(|iface| (iface.ifindex, iface.is_operative()))
                    .ok_or_else(|| {
                        ValidationError::InterfaceNotFound(ifname.clone())
                    })?,
                (None, Some(ifindex)) => self
                    .interfaces
                    .get_by_ifindex(ifindex)
                    .map(|iface| (iface.ifindex, iface.is_operative()))
                    .ok_or_else(|| {
                        ValidationError::InterfaceNotFound(ifindex.to_string())
                    })?,
                (None, None) => (0, true),
            };

            let mut flags = RouteFlags::empty();
            if req.null_route {
                flags.insert(RouteFlags::NULL);
            }
            if !operative {
                flags.insert(RouteFlags::LINK_DOWN);
            }

            let resolved = if req.null_route {
                ResolvedNexthop::new(nexthop.addr, 0, true)
            } else if nexthop.addr.is_unspecified() {
                ResolvedNexthop::new(nexthop.addr, ifindex, operative)
            } else if !operative {
                ResolvedNexthop::new(nexthop.addr, ifindex, false)
            } else {
                // Routes without an egress interface must be resolvable.
                match self.rib.resolve(nexthop.addr, Some(req.prefix)) {
                    Err(ResolveError::Unreachable(_)) if ifindex == 0 => {
                        return Err(ValidationError::NexthopUnreachable(
                            nexthop.addr,
                        ));
                    }
                    _ => ResolvedNexthop::new(nexthop.addr, ifindex, false),
                }
            };

            routes.push(Route {
                protocol: req.protocol,
                prefix: req.prefix,
                nexthop: nexthop.addr,
                ifindex,
                metric: req.metric,
                weight: nexthop.weight,
                resolved,
                index: 0,
                created: now,
                updated: now,
                flags,
            });
        }
        Ok(routes)
    }
}
