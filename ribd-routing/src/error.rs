//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ribd_utils::DatabaseError;
use ribd_utils::protocol::Protocol;
use tracing::{error, warn};

use crate::collaborator::CollaboratorKind;

// RIB errors.
#[derive(Debug)]
pub enum Error {
    // Admission
    Validation(ValidationError),
    // Next hop resolution
    Resolution(ResolveError),
    // Policy configuration
    Policy(ribd_policy::Error),
    // I/O errors
    Io(IoError),
    // Inter-task communication
    CollaboratorDown(CollaboratorKind),
    ChannelClosed,
}

// Admission errors.
//
// A request failing validation is never applied to the RIB.
#[derive(Debug)]
pub enum ValidationError {
    UnknownProtocol(String),
    ConnectedProtocol,
    InvalidPrefix(IpAddr, IpAddr),
    FamilyMismatch(IpNetwork, IpAddr),
    MissingNexthops,
    InvalidNexthop(IpAddr),
    InvalidNullRoute(IpNetwork),
    InterfaceNotFound(String),
    NexthopUnreachable(IpAddr),
    DuplicateRoute(IpNetwork, Protocol),
    WorseMetric(IpNetwork, Protocol, u32),
    RouteNotFound(IpNetwork, Protocol),
}

// Next hop resolution errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolveError {
    Unreachable(IpAddr),
    ResolutionCycle(IpAddr),
}

// Collaborator I/O errors.
#[derive(Debug)]
pub enum IoError {
    ConnectError(CollaboratorKind, std::io::Error),
    SendError(CollaboratorKind, std::io::Error),
    EncodeError(serde_json::Error),
    DatabaseError(DatabaseError),
    DatabaseTask(tokio::task::JoinError),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::Validation(error) => {
                error.log();
            }
            Error::Resolution(error) => {
                error.log();
            }
            Error::Policy(error) => {
                error.log();
            }
            Error::Io(error) => {
                error.log();
            }
            Error::CollaboratorDown(kind) => {
                warn!(collaborator = %kind, "{}", self);
            }
            Error::ChannelClosed => {
                error!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Validation(error) => error.fmt(f),
            Error::Resolution(error) => error.fmt(f),
            Error::Policy(error) => error.fmt(f),
            Error::Io(error) => error.fmt(f),
            Error::CollaboratorDown(..) => {
                write!(f, "collaborator unavailable, request dropped")
            }
            Error::ChannelClosed => {
                write!(f, "route processing task is gone")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Validation(error) => Some(error),
            Error::Resolution(error) => Some(error),
            Error::Policy(error) => Some(error),
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(error: ValidationError) -> Error {
        Error::Validation(error)
    }
}

impl From<ResolveError> for Error {
    fn from(error: ResolveError) -> Error {
        Error::Resolution(error)
    }
}

impl From<ribd_policy::Error> for Error {
    fn from(error: ribd_policy::Error) -> Error {
        Error::Policy(error)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::Io(error)
    }
}

// ===== impl ValidationError =====

impl ValidationError {
    pub fn log(&self) {
        match self {
            ValidationError::UnknownProtocol(protocol) => {
                warn!(%protocol, "{}", self);
            }
            ValidationError::ConnectedProtocol
            | ValidationError::MissingNexthops => {
                warn!("{}", self);
            }
            ValidationError::InvalidPrefix(addr, mask) => {
                warn!(%addr, %mask, "{}", self);
            }
            ValidationError::FamilyMismatch(prefix, nexthop) => {
                warn!(%prefix, %nexthop, "{}", self);
            }
            ValidationError::InvalidNexthop(nexthop)
            | ValidationError::NexthopUnreachable(nexthop) => {
                warn!(%nexthop, "{}", self);
            }
            ValidationError::InvalidNullRoute(prefix) => {
                warn!(%prefix, "{}", self);
            }
            ValidationError::InterfaceNotFound(ifname) => {
                warn!(%ifname, "{}", self);
            }
            ValidationError::DuplicateRoute(prefix, protocol)
            | ValidationError::RouteNotFound(prefix, protocol) => {
                warn!(%prefix, %protocol, "{}", self);
            }
            ValidationError::WorseMetric(prefix, protocol, metric) => {
                warn!(%prefix, %protocol, %metric, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::UnknownProtocol(..) => {
                write!(f, "unknown protocol")
            }
            ValidationError::ConnectedProtocol => {
                write!(
                    f,
                    "connected routes are derived from interface addresses"
                )
            }
            ValidationError::InvalidPrefix(..) => {
                write!(f, "invalid destination or netmask")
            }
            ValidationError::FamilyMismatch(..) => {
                write!(f, "next hop address family doesn't match the prefix")
            }
            ValidationError::MissingNexthops => {
                write!(f, "no next hops specified")
            }
            ValidationError::InvalidNexthop(..) => {
                write!(f, "invalid next hop address")
            }
            ValidationError::InvalidNullRoute(..) => {
                write!(f, "null route without the null next hop")
            }
            ValidationError::InterfaceNotFound(..) => {
                write!(f, "egress interface not found")
            }
            ValidationError::NexthopUnreachable(..) => {
                write!(f, "next hop is unreachable")
            }
            ValidationError::DuplicateRoute(..) => {
                write!(f, "route already exists with the same or better metric")
            }
            ValidationError::WorseMetric(..) => {
                write!(f, "route has a worse metric than the existing ones")
            }
            ValidationError::RouteNotFound(..) => {
                write!(f, "route not found")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ===== impl ResolveError =====

impl ResolveError {
    pub fn log(&self) {
        match self {
            ResolveError::Unreachable(addr)
            | ResolveError::ResolutionCycle(addr) => {
                warn!(address = %addr, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Unreachable(..) => {
                write!(f, "no route covering the next hop")
            }
            ResolveError::ResolutionCycle(..) => {
                write!(f, "next hop resolution doesn't terminate")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::ConnectError(kind, error)
            | IoError::SendError(kind, error) => {
                warn!(
                    collaborator = %kind,
                    error = %with_source(error),
                    "{}",
                    self
                );
            }
            IoError::EncodeError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::DatabaseError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::DatabaseTask(error) => {
                error!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::ConnectError(..) => {
                write!(f, "failed to connect to collaborator")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send request to collaborator")
            }
            IoError::EncodeError(..) => {
                write!(f, "failed to encode message")
            }
            IoError::DatabaseError(..) => {
                write!(f, "database operation failed")
            }
            IoError::DatabaseTask(..) => {
                write!(f, "database task aborted")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::ConnectError(_, error) | IoError::SendError(_, error) => {
                Some(error)
            }
            IoError::EncodeError(error) => Some(error),
            IoError::DatabaseError(error) => Some(error),
            IoError::DatabaseTask(error) => Some(error),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
