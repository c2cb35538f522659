//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Route sources known to the RIB.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    CONNECTED,
    STATIC,
    EBGP,
    OSPF,
    IBGP,
}

// ===== impl Protocol =====

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::CONNECTED,
        Protocol::STATIC,
        Protocol::EBGP,
        Protocol::OSPF,
        Protocol::IBGP,
    ];
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::CONNECTED => write!(f, "connected"),
            Protocol::STATIC => write!(f, "static"),
            Protocol::EBGP => write!(f, "ebgp"),
            Protocol::OSPF => write!(f, "ospf"),
            Protocol::IBGP => write!(f, "ibgp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "connected" => Ok(Protocol::CONNECTED),
            "static" => Ok(Protocol::STATIC),
            "ebgp" => Ok(Protocol::EBGP),
            "ospf" => Ok(Protocol::OSPF),
            "ibgp" => Ok(Protocol::IBGP),
            _ => Err(()),
        }
    }
}
