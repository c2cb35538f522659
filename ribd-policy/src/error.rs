//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ribd_utils::policy::PolicyType;
use tracing::warn;

// Policy engine errors.
#[derive(Debug)]
pub enum Error {
    PolicyNotFound(String),
    PolicyAlreadyApplied(String, PolicyType),
    PolicyNotApplied(String, PolicyType),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::PolicyNotFound(name) => {
                warn!(%name, "{}", self);
            }
            Error::PolicyAlreadyApplied(name, policy_type)
            | Error::PolicyNotApplied(name, policy_type) => {
                warn!(%name, ?policy_type, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PolicyNotFound(..) => {
                write!(f, "policy not found")
            }
            Error::PolicyAlreadyApplied(..) => {
                write!(f, "policy already applied")
            }
            Error::PolicyNotApplied(..) => {
                write!(f, "policy not applied")
            }
        }
    }
}

impl std::error::Error for Error {}
