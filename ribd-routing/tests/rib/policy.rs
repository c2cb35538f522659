//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use maplit::btreeset;
use ribd_routing::admission::RouteOp;
use ribd_routing::fib::{NotifyMsg, NotifyTarget};
use ribd_routing::rib::RouteFlags;
use ribd_utils::ibus::IbusMsg;
use ribd_utils::policy::{
    DefaultPolicyType, IpPrefixRange, PolicyAction, PolicyCondition,
    PolicyType,
};
use ribd_utils::protocol::Protocol;

use super::*;

fn route_24(
    protocol: &str,
    destination: &str,
    nexthop: &str,
) -> ProtocolRoute {
    route(protocol, destination, "255.255.255.0", &[nexthop], 10)
}

// Returns the redistribution events published for the given protocol, as
// (added, prefix) pairs.
fn redistribution_events(
    receivers: &mut FibReceivers,
    protocol: Protocol,
) -> Vec<(bool, IpNetwork)> {
    notify_msgs(receivers)
        .into_iter()
        .filter_map(|msg| match msg {
            NotifyMsg::Publish {
                target: NotifyTarget::Protocol(target),
                msg,
            } if target == protocol => match msg {
                IbusMsg::RouteRedistributeAdd(msg) => Some((true, msg.prefix)),
                IbusMsg::RouteRedistributeDel(msg) => {
                    Some((false, msg.prefix))
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_import_reject() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_24("static", "50.0.0.0", "33.1.10.2");
    let ospf = route_24("ospf", "50.0.0.0", "33.1.10.3");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    asic_msgs(&mut rx);

    // Reject static routes: the OSPF route takes over.
    let reject = policy(
        "reject-static",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![PolicyAction::Accept(false)],
    );
    policy_apply(&mut master, reject, PolicyType::Import).await;
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::OSPF));
    let stat_routes = &entry(&master, "50.0.0.0/24").routes[&Protocol::STATIC];
    assert!(stat_routes[0].flags.contains(RouteFlags::REJECTED));
    assert_eq!(
        asic_summary(&asic_msgs(&mut rx)),
        vec![
            (false, net("50.0.0.0/24"), ip("33.1.10.2")),
            (true, net("50.0.0.0/24"), ip("33.1.10.3")),
        ]
    );
    assert_eq!(
        entry(&master, "50.0.0.0/24").policies,
        btreeset! { "reject-static".to_owned() }
    );

    // New static routes are rejected on entry.
    let stat = route_24("static", "51.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    assert_eq!(selected(&master, "51.0.0.0/24"), None);
    assert!(installed(&master, "51.0.0.0/24").is_empty());

    // Unapplying the policy reverts its effects.
    policy_unapply(&mut master, "reject-static", PolicyType::Import).await;
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    assert_eq!(selected(&master, "51.0.0.0/24"), Some(Protocol::STATIC));
    assert_eq!(installed(&master, "51.0.0.0/24").len(), 1);
}

#[tokio::test]
async fn test_overlapping_reject() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_24("static", "50.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();

    let reject_a = policy(
        "reject-a",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![PolicyAction::Accept(false)],
    );
    let reject_b = policy(
        "reject-b",
        vec![PolicyCondition::MatchPrefix(IpPrefixRange::exact(net(
            "50.0.0.0/24",
        )))],
        vec![PolicyAction::Accept(false)],
    );
    policy_apply(&mut master, reject_a, PolicyType::Import).await;
    policy_apply(&mut master, reject_b, PolicyType::Import).await;
    assert_eq!(selected(&master, "50.0.0.0/24"), None);
    asic_msgs(&mut rx);

    // The remaining policy still rejects the route.
    policy_unapply(&mut master, "reject-a", PolicyType::Import).await;
    let stat_routes = &entry(&master, "50.0.0.0/24").routes[&Protocol::STATIC];
    assert!(stat_routes[0].flags.contains(RouteFlags::REJECTED));
    assert_eq!(selected(&master, "50.0.0.0/24"), None);
    assert!(installed(&master, "50.0.0.0/24").is_empty());
    assert!(asic_msgs(&mut rx).is_empty());

    // So does the default disposition once no policy is left.
    master
        .process(RibMsg::PolicyDefaultSet {
            policy_type: PolicyType::Import,
            default: DefaultPolicyType::RejectRoute,
        })
        .await;
    policy_unapply(&mut master, "reject-b", PolicyType::Import).await;
    assert_eq!(selected(&master, "50.0.0.0/24"), None);
    assert!(asic_msgs(&mut rx).is_empty());

    master
        .process(RibMsg::PolicyDefaultSet {
            policy_type: PolicyType::Import,
            default: DefaultPolicyType::AcceptRoute,
        })
        .await;
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    assert_eq!(installed(&master, "50.0.0.0/24").len(), 1);
}

#[tokio::test]
async fn test_export_redistribute() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_24("static", "50.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    notify_msgs(&mut rx);

    let redist = policy(
        "static-to-ospf",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![PolicyAction::Redistribute(Protocol::OSPF)],
    );
    policy_apply(&mut master, redist, PolicyType::Export).await;
    assert_eq!(
        redistribution_events(&mut rx, Protocol::OSPF),
        vec![(true, net("50.0.0.0/24"))]
    );

    // Routes installed afterwards are redistributed as well.
    let stat = route_24("static", "51.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    assert_eq!(
        redistribution_events(&mut rx, Protocol::OSPF),
        vec![(true, net("51.0.0.0/24"))]
    );
    assert_eq!(master.rib.redistribution[&Protocol::OSPF].len(), 2);

    // Withdrawing a route withdraws its redistributed copy.
    route_op(&mut master, RouteOp::Delete, &stat).await.unwrap();
    assert_eq!(
        redistribution_events(&mut rx, Protocol::OSPF),
        vec![(false, net("51.0.0.0/24"))]
    );

    // So does unapplying the policy.
    policy_unapply(&mut master, "static-to-ospf", PolicyType::Export).await;
    assert_eq!(
        redistribution_events(&mut rx, Protocol::OSPF),
        vec![(false, net("50.0.0.0/24"))]
    );
    assert!(master.rib.redistribution.is_empty());
}

#[tokio::test]
async fn test_network_statement() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_24("static", "50.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    notify_msgs(&mut rx);

    let network = policy(
        "static-network",
        vec![PolicyCondition::SrcProtocol(Protocol::STATIC)],
        vec![PolicyAction::NetworkStatement(Protocol::OSPF)],
    );
    policy_apply(&mut master, network, PolicyType::Export).await;
    let adds = notify_msgs(&mut rx)
        .into_iter()
        .filter_map(|msg| match msg {
            NotifyMsg::Publish {
                target: NotifyTarget::Protocol(Protocol::OSPF),
                msg: IbusMsg::RouteRedistributeAdd(msg),
            } => Some(msg),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].prefix, net("50.0.0.0/24"));
    assert!(adds[0].network_statement);

    policy_unapply(&mut master, "static-network", PolicyType::Export).await;
    assert_eq!(
        redistribution_events(&mut rx, Protocol::OSPF),
        vec![(false, net("50.0.0.0/24"))]
    );
    assert!(master.rib.redistribution.is_empty());
}

#[tokio::test]
async fn test_set_admin_distance() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let ebgp = route_24("ebgp", "50.0.0.0", "33.1.10.2");
    let ospf = route_24("ospf", "50.0.0.0", "33.1.10.3");
    route_op(&mut master, RouteOp::Create, &ebgp).await.unwrap();
    route_op(&mut master, RouteOp::Create, &ospf).await.unwrap();
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::EBGP));

    let distance = policy(
        "ospf-distance",
        vec![PolicyCondition::SrcProtocol(Protocol::OSPF)],
        vec![PolicyAction::SetAdminDistance(5)],
    );
    policy_apply(&mut master, distance, PolicyType::Import).await;
    assert_eq!(master.rib.distances.effective(Protocol::OSPF), 5);
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::OSPF));
    assert_eq!(installed(&master, "50.0.0.0/24")[0].nexthop, ip("33.1.10.3"));

    let (responder, distances) = oneshot::channel();
    master.process(RibMsg::GetDistances { responder }).await;
    let distances = distances.await.unwrap();
    let ospf = distances
        .iter()
        .find(|state| state.protocol == Protocol::OSPF)
        .unwrap();
    assert_eq!(ospf.effective, 5);

    policy_unapply(&mut master, "ospf-distance", PolicyType::Import).await;
    assert_eq!(master.rib.distances.effective(Protocol::OSPF), 110);
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::EBGP));
}

#[tokio::test]
async fn test_default_import_reject() {
    let (mut master, mut rx) = master();
    topology(&mut master, &mut rx).await;

    let stat = route_24("static", "50.0.0.0", "33.1.10.2");
    route_op(&mut master, RouteOp::Create, &stat).await.unwrap();
    asic_msgs(&mut rx);

    master
        .process(RibMsg::PolicyDefaultSet {
            policy_type: PolicyType::Import,
            default: DefaultPolicyType::RejectRoute,
        })
        .await;
    assert_eq!(selected(&master, "50.0.0.0/24"), None);
    assert!(installed(&master, "50.0.0.0/24").is_empty());
    assert!(!asic_msgs(&mut rx).is_empty());

    master
        .process(RibMsg::PolicyDefaultSet {
            policy_type: PolicyType::Import,
            default: DefaultPolicyType::AcceptRoute,
        })
        .await;
    assert_eq!(selected(&master, "50.0.0.0/24"), Some(Protocol::STATIC));
    assert_eq!(installed(&master, "50.0.0.0/24").len(), 1);
}

#[tokio::test]
async fn test_policy_errors() {
    let (mut master, _rx) = master();

    let (responder, rx) = oneshot::channel();
    master
        .process(RibMsg::PolicyApply {
            name: "none".to_owned(),
            policy_type: PolicyType::Import,
            responder,
        })
        .await;
    assert!(matches!(
        rx.await.unwrap(),
        Err(Error::Policy(ribd_policy::Error::PolicyNotFound(_)))
    ));

    let (responder, rx) = oneshot::channel();
    master
        .process(RibMsg::PolicyDel {
            name: "none".to_owned(),
            responder,
        })
        .await;
    assert!(rx.await.unwrap().is_err());
}
