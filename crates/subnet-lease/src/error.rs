//! Error types for subnet partitioning and lease coordination

use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

/// Result type for subnet lease operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which end of the allocatable range a bound error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    SubnetMin,
    SubnetMax,
}

impl std::fmt::Display for RangeBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeBound::SubnetMin => write!(f, "SubnetMin"),
            RangeBound::SubnetMax => write!(f, "SubnetMax"),
        }
    }
}

/// Subnet lease errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    // Validation errors
    #[error("Malformed network config: {0}")]
    MalformedConfig(String),

    #[error("SubnetLen must be less than /{}, got /{subnet_len}", .max + 1)]
    SubnetLenTooLarge { subnet_len: u32, max: u8 },

    #[error("Network {network} must be able to accommodate at least four subnets of /{subnet_len}")]
    TooFewSubnets { network: IpNet, subnet_len: u8 },

    #[error("Network is too small. Minimum useful network prefix is /{min_prefix}, got {network}")]
    NetworkTooSmall { network: IpNet, min_prefix: u8 },

    #[error("{bound} {addr} is not in the range of the Network {network}")]
    BoundOutOfRange {
        bound: RangeBound,
        addr: IpAddr,
        network: IpNet,
    },

    #[error("{bound} is not on a SubnetLen boundary: {addr}")]
    BoundMisaligned { bound: RangeBound, addr: IpAddr },

    #[error("SubnetMin {min} is greater than SubnetMax {max}")]
    EmptyRange { min: IpAddr, max: IpAddr },

    #[error("error decoding Backend property of config: {0}")]
    BackendDecode(String),

    #[error("Subnet {0} is not an allocatable subnet of the network")]
    SubnetOutOfRange(IpNet),

    // Contention errors
    #[error("subnet: lease already taken: {0}")]
    LeaseTaken(IpNet),

    #[error("subnet: no more tries after {attempts} attempts")]
    NoMoreTries { attempts: usize },

    // Ownership errors
    #[error("Lease for {0} is no longer owned by this agent")]
    LeaseNotOwned(IpNet),

    // Decode errors
    #[error("Decode error: {0}")]
    Decode(String),

    // Cancellation
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    // Store errors
    #[error("Lease store error: {0}")]
    Store(String),
}

impl Error {
    /// Configuration problems that must be fixed by the operator
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::MalformedConfig(_)
                | Error::SubnetLenTooLarge { .. }
                | Error::TooFewSubnets { .. }
                | Error::NetworkTooSmall { .. }
                | Error::BoundOutOfRange { .. }
                | Error::BoundMisaligned { .. }
                | Error::EmptyRange { .. }
                | Error::BackendDecode(_)
                | Error::SubnetOutOfRange(_)
        )
    }

    /// Another agent won the race; the caller may retry with other parameters
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::LeaseTaken(_) | Error::NoMoreTries { .. })
    }

    /// The lease instance is gone and has to be re-acquired
    pub fn is_ownership(&self) -> bool {
        matches!(self, Error::LeaseNotOwned(_))
    }

    /// Aborted by the caller's context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
