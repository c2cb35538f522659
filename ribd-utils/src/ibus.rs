//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::southbound::{RouteKeyMsg, RouteMsg};
use crate::{UnboundedReceiver, UnboundedSender};

/// Event published by the RIB to subscribed routing protocol daemons.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// A route was redistributed (or advertised through a network statement)
    /// into the subscriber's protocol.
    RouteRedistributeAdd(RouteMsg),
    /// A previously redistributed route was withdrawn.
    RouteRedistributeDel(RouteKeyMsg),
    /// Reachability of a tracked next hop has changed.
    NexthopUpd {
        addr: IpAddr,
        reachable: bool,
        resolved: Option<IpAddr>,
        ifindex: Option<u32>,
    },
}

/// Envelope delivered to subscribers.
///
/// The payload carries the JSON encoding of the corresponding [`IbusMsg`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Notification {
    pub msg_type: String,
    pub payload: String,
}

/// Subscriber to [`Notification`] messages.
#[derive(Clone, Debug)]
pub struct IbusSubscriber {
    /// Unique identifier for the subscriber.
    pub id: usize,
    /// Channel for sending messages to the subscriber.
    pub tx: UnboundedSender<Notification>,
}

// ===== impl IbusMsg =====

impl IbusMsg {
    pub fn msg_type(&self) -> &'static str {
        match self {
            IbusMsg::RouteRedistributeAdd(..) => "route-created",
            IbusMsg::RouteRedistributeDel(..) => "route-deleted",
            IbusMsg::NexthopUpd { .. } => "nexthop-reachability",
        }
    }

    pub fn encode(&self) -> Result<Notification, serde_json::Error> {
        Ok(Notification {
            msg_type: self.msg_type().to_owned(),
            payload: serde_json::to_string(self)?,
        })
    }
}

// ===== impl Notification =====

impl Notification {
    pub fn decode(&self) -> Result<IbusMsg, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

// ===== impl IbusSubscriber =====

impl IbusSubscriber {
    pub fn new(tx: UnboundedSender<Notification>) -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        IbusSubscriber {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }
}

// ===== global functions =====

/// Creates a subscriber along with the receiving end of its channel.
pub fn subscriber_channel() -> (IbusSubscriber, UnboundedReceiver<Notification>)
{
    let (tx, rx) = mpsc::unbounded_channel();
    (IbusSubscriber::new(tx), rx)
}
