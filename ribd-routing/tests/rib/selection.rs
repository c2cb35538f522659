//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ribd_routing::admission::RouteOp;
use ribd_routing::error::{Error, ValidationError};
use ribd_routing::rib::RouteFlags;
use ribd_utils::protocol::Protocol;
use ribd_utils::southbound::NexthopCfg;

use super::*;

#[tokio::test]
async fn test_scenario_static_over_ebgp() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    // EBGP route through lo1.
    let mut ebgp = route_fn("ebgp", "40.1.10.0", &[], 0);
    ebgp.nexthops = vec![NexthopCfg::with_ifname(ip("11.1.10.2"), "lo1")];
    assert!(route_op(&mut master, RouteOp::Create, &ebgp).await.unwrap());
    assert_eq!(selected(&master, "40.1.10.0/24"), Some(Protocol::EBGP));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![(true, net("40.1.10.0/24"), ip("11.1.10.2"))]
    );
    let routes = installed(&master, "40.1.10.0/24");
    assert_eq!(routes[0].resolved.ifindex, 1);
    assert!(routes[0].resolved.reachable);

    // A static route takes over.
    let stat = route_fn("static", "40.1.10.0", &["33.1.10.2"], 0);
    assert!(route_op(&mut master, RouteOp::Create, &stat).await.unwrap());
    assert_eq!(selected(&master, "40.1.10.0/24"), Some(Protocol::STATIC));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![
            (false, net("40.1.10.0/24"), ip("11.1.10.2")),
            (true, net("40.1.10.0/24"), ip("33.1.10.2")),
        ]
    );
    let ebgp_routes = &entry(&master, "40.1.10.0/24").routes[&Protocol::EBGP];
    assert_eq!(ebgp_routes.len(), 1);
    assert!(!ebgp_routes[0].is_installed());

    // Withdrawing the static route brings the EBGP route back.
    assert!(route_op(&mut master, RouteOp::Delete, &stat).await.unwrap());
    assert_eq!(selected(&master, "40.1.10.0/24"), Some(Protocol::EBGP));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![
            (false, net("40.1.10.0/24"), ip("33.1.10.2")),
            (true, net("40.1.10.0/24"), ip("11.1.10.2")),
        ]
    );
}

#[tokio::test]
async fn test_distance_ordering() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    for protocol in ["ibgp", "ospf", "ebgp"] {
        let route = route_fn(protocol, "50.0.0.0", &["33.1.10.2"], 10);
        route_op(&mut master, RouteOp::Create, &route).await.unwrap();
    }
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::EBGP));
    assert!(
        installed(&master, "50.0.0.0/24")
            .iter()
            .all(|route| route.protocol == Protocol::EBGP)
    );

    // Each better protocol replaced the previous one in the FIB.
    let msgs = asic_summary(&asic_msgs(&mut rx));
    assert_eq!(msgs.iter().filter(|(add, ..)| *add).count(), 3);
    assert_eq!(msgs.iter().filter(|(add, ..)| !add).count(), 2);
}

#[tokio::test]
async fn test_ecmp_grouping() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2", "33.1.10.3"], 10);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    assert_eq!(installed(&master, "50.0.0.0/24").len(), 2);
    assert_eq!(asic_msgs(&mut rx).len(), 2);

    // Equal metric, new next hop: new ECMP member.
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.4"], 10);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    let routes = installed(&master, "50.0.0.0/24");
    assert_eq!(routes.len(), 3);
    assert!(routes.iter().all(|route| route.metric == 10));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![(true, net("50.0.0.0/24"), ip("33.1.10.4"))]
    );

    // Strictly lower metric: the whole group is replaced.
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.5"], 5);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    let routes = installed(&master, "50.0.0.0/24");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].nexthop, ip("33.1.10.5"));
    let msgs = asic_summary(&asic_msgs(&mut rx));
    assert_eq!(msgs.iter().filter(|(add, ..)| !add).count(), 3);
    assert_eq!(
        msgs.last(),
        Some(&(true, net("50.0.0.0/24"), ip("33.1.10.5")))
    );
}

#[tokio::test]
async fn test_duplicate_rejection() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2"], 10);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    asic_msgs(&mut rx);

    // Same next hop, equal or higher metric.
    for metric in [10, 20] {
        let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2"], metric);
        let result = route_op(&mut master, RouteOp::Create, &ospf).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::DuplicateRoute(..)))
        ));
    }

    // New next hop, higher metric.
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.3"], 20);
    let result = route_op(&mut master, RouteOp::Create, &ospf).await;
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::WorseMetric(..)))
    ));
    assert!(asic_msgs(&mut rx).is_empty());

    // Same next hop, strictly lower metric.
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2"], 5);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    let routes = installed(&master, "50.0.0.0/24");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].metric, 5);
}

#[tokio::test]
async fn test_withdrawal_reselection() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_fn("static", "50.0.0.0", &["33.1.10.2"], 0);
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.3"], 10);
    let ibgp = route_fn("ibgp", "50.0.0.0", &["33.1.10.4"], 10);
    for route in [&stat, &ospf, &ibgp] {
        route_op(&mut master, RouteOp::Create, route).await.unwrap();
    }
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    asic_msgs(&mut rx);

    // Deleting a candidate that isn't selected causes no churn.
    route_op(&mut master, RouteOp::Delete, &ibgp).await.unwrap();
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    assert!(asic_msgs(&mut rx).is_empty());

    // Deleting the selected one promotes the next-ranked protocol.
    route_op(&mut master, RouteOp::Delete, &stat).await.unwrap();
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::OSPF));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![
            (false, net("50.0.0.0/24"), ip("33.1.10.2")),
            (true, net("50.0.0.0/24"), ip("33.1.10.3")),
        ]
    );

    // Deleting the last candidate removes the prefix.
    route_op(&mut master, RouteOp::Delete, &ospf).await.unwrap();
    assert!(master.rib.table.get(&net("50.0.0.0/24")).is_none());
}

#[tokio::test]
async fn test_update_replaces_group() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2", "33.1.10.3"], 10);
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();

    // Updates may carry a worse metric.
    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.4"], 30);
    route_op(&mut master, RouteOp::Update, &ospf).await.unwrap();
    let routes = installed(&master, "50.0.0.0/24");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].nexthop, ip("33.1.10.4"));
    assert_eq!(routes[0].metric, 30);
}

#[tokio::test]
async fn test_null_route() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let null = route_fn("static", "60.0.0.0", &["255.255.255.255"], 0);
    route_op(&mut master, RouteOp::Create, &null).await.unwrap();
    let routes = installed(&master, "60.0.0.0/24");
    assert_eq!(routes.len(), 1);
    assert!(routes[0].flags.contains(RouteFlags::NULL));
    let msgs = asic_msgs(&mut rx);
    assert!(matches!(
        &msgs[..],
        [AsicMsg::Add { route, .. }] if route.null_route
    ));

    // Null routes don't need layer 2 resolution.
    assert!(rx.arp.try_recv().is_err());
}

#[tokio::test]
async fn test_bulk_programming() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let ospf = route_fn("ospf", "50.0.0.0", &["33.1.10.2"], 10);
    let mut req = RouteRequest::validate(&ospf, RouteOp::Create).unwrap();
    req.bulk = true;
    master
        .process(RibMsg::Route {
            op: RouteOp::Create,
            req,
            responder: None,
        })
        .await;
    assert!(matches!(
        &asic_msgs(&mut rx)[..],
        [AsicMsg::Add { bulk: true, .. }]
    ));
    assert!(!master.fib.bulk);
}

//
// Helper functions.
//

// Builds a /24 route.
fn route_fn(
    protocol: &str,
    destination: &str,
    nexthops: &[&str],
    metric: u32,
) -> ribd_utils::southbound::ProtocolRoute {
    route(protocol, destination, "255.255.255.0", nexthops, metric)
}
