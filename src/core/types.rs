//! Core identifier types for the execution engine.
//!
//! These types provide type-safe identifiers for tasks, execution units,
//! catalog entries, users and live subscribers, plus the validated target
//! address every task runs against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store-assigned identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the underlying integer value.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a detection task.
    TaskId
);
numeric_id!(
    /// Identifier of one execution unit (task result) within a task.
    UnitId
);
numeric_id!(
    /// Identifier of a catalog case.
    CaseId
);
numeric_id!(
    /// Identifier of a case category.
    CategoryId
);
numeric_id!(
    /// Identifier of the user owning a task.
    UserId
);

/// Identifier of a live subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a new random SubscriberId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a target address fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid IPv4 address: {0:?}")]
pub struct InvalidTarget(pub String);

/// A validated IPv4 target address.
///
/// Only dotted-quad literals are accepted: no hostnames, no IPv6, no
/// surrounding whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetAddr(Ipv4Addr);

impl TargetAddr {
    /// Parse and validate a target address.
    pub fn parse(s: &str) -> Result<Self, InvalidTarget> {
        s.parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| InvalidTarget(s.to_string()))
    }

    /// Get the underlying address.
    pub fn ip(&self) -> Ipv4Addr {
        self.0
    }
}

impl From<Ipv4Addr> for TargetAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip)
    }
}

impl FromStr for TargetAddr {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TargetAddr {
    type Error = InvalidTarget;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TargetAddr> for String {
    fn from(addr: TargetAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
