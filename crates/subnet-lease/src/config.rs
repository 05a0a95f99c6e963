//! Network configuration and partition validation
//!
//! A cluster shares one network range. Before any lease can be handed out
//! the range is split into a grid of equally sized per-host subnets:
//!
//! - `SubnetLen` is the prefix length of every per-host subnet, either given
//!   by the operator or derived from the size of the network
//! - `SubnetMin`/`SubnetMax` bound the part of the grid that may be leased;
//!   the first subnet of the network is skipped by default because its
//!   network address collides with the network's own
//!
//! The same rules apply to IPv4 and IPv6, parameterized by [`PartitionLimits`].

use crate::error::RangeBound;
use crate::ip::{self, IpFamily};
use crate::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// Backend type used when the config carries no `Backend` section
pub const DEFAULT_BACKEND_TYPE: &str = "udp";

/// Family-specific constants driving the partition rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLimits {
    /// Address width in bits
    pub addr_bits: u8,
    /// Longest allowed per-host prefix (leaves room for a tunnel and a bridge address)
    pub max_subnet_len: u8,
    /// Longest network prefix that still fits four per-host subnets
    pub min_useful_prefix: u8,
    /// Per-host prefix used for networks at least as large as the threshold
    pub default_subnet_len: u8,
    /// Networks with a prefix up to this value get `default_subnet_len`
    pub default_prefix_threshold: u8,
}

/// IPv4 partition limits
pub const IPV4_LIMITS: PartitionLimits = PartitionLimits {
    addr_bits: 32,
    max_subnet_len: 30,
    min_useful_prefix: 28,
    default_subnet_len: 24,
    default_prefix_threshold: 22,
};

/// IPv6 partition limits
pub const IPV6_LIMITS: PartitionLimits = PartitionLimits {
    addr_bits: 128,
    max_subnet_len: 126,
    min_useful_prefix: 124,
    default_subnet_len: 120,
    default_prefix_threshold: 118,
};

impl PartitionLimits {
    /// Limits for an address family
    pub fn for_family(family: IpFamily) -> &'static PartitionLimits {
        match family {
            IpFamily::V4 => &IPV4_LIMITS,
            IpFamily::V6 => &IPV6_LIMITS,
        }
    }

    /// Validate a requested per-host prefix length or derive the default one
    ///
    /// `None` and `Some(0)` both mean "not configured".
    pub fn resolve_subnet_len(&self, network: &IpNet, requested: Option<u32>) -> Result<u8> {
        let prefix = network.prefix_len();

        match requested.filter(|&len| len > 0) {
            Some(len) => {
                if len > u32::from(self.max_subnet_len) {
                    return Err(Error::SubnetLenTooLarge {
                        subnet_len: len,
                        max: self.max_subnet_len,
                    });
                }
                // bounded by max_subnet_len above
                let len = len as u8;

                // The first subnet is never leased, so the network has to hold
                // more than two subnets to leave at least two usable ones.
                if u16::from(len) < u16::from(prefix) + 2 {
                    return Err(Error::TooFewSubnets {
                        network: *network,
                        subnet_len: len,
                    });
                }
                Ok(len)
            }
            None if prefix > self.min_useful_prefix => Err(Error::NetworkTooSmall {
                network: *network,
                min_prefix: self.min_useful_prefix,
            }),
            None if prefix <= self.default_prefix_threshold => Ok(self.default_subnet_len),
            None => Ok(prefix + 2),
        }
    }
}

/// Network configuration document as written by the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawNetworkConfig {
    /// Shared network range in CIDR notation
    pub network: IpNet,
    /// First leasable subnet address (defaults to the second subnet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_min: Option<IpAddr>,
    /// Last leasable subnet address (defaults to the last subnet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_max: Option<IpAddr>,
    /// Per-host prefix length (derived when absent or zero)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_len: Option<u32>,
    /// Opaque data-plane backend section
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Box<RawValue>>,
}

impl RawNetworkConfig {
    /// Document with only the network set
    pub fn new(network: IpNet) -> Self {
        Self {
            network,
            subnet_min: None,
            subnet_max: None,
            subnet_len: None,
            backend: None,
        }
    }
}

/// Validated network configuration
///
/// All fields are jointly consistent; there is no way to build or mutate one
/// outside of [`NetworkConfig::from_raw`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConfig {
    network: IpNet,
    subnet_min: IpAddr,
    subnet_max: IpAddr,
    subnet_len: u8,
    #[serde(skip)]
    backend_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<Box<RawValue>>,
}

impl NetworkConfig {
    /// Parse and validate a JSON config document
    pub fn parse(s: &str) -> Result<Self> {
        let raw: RawNetworkConfig =
            serde_json::from_str(s).map_err(|e| Error::MalformedConfig(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Read, parse and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::MalformedConfig(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Validate a config document
    pub fn from_raw(raw: RawNetworkConfig) -> Result<Self> {
        let network = raw.network.trunc();
        let family = IpFamily::of_net(&network);
        let limits = PartitionLimits::for_family(family);

        let subnet_len = limits.resolve_subnet_len(&network, raw.subnet_len)?;
        let too_few = || Error::TooFewSubnets {
            network,
            subnet_len,
        };
        let size = ip::subnet_size(family, subnet_len).ok_or_else(too_few)?;

        let unset = |addr: &IpAddr| *addr == family.unspecified();

        let subnet_min = match raw.subnet_min.filter(|a| !unset(a)) {
            // Skip the network's own first subnet, its base address is the network address.
            None => ip::offset_ip(network.addr(), size).ok_or_else(too_few)?,
            Some(addr) => {
                ensure_in_network(&network, addr, RangeBound::SubnetMin)?;
                addr
            }
        };

        let subnet_max = match raw.subnet_max.filter(|a| !unset(a)) {
            // Base address of the network's last subnet.
            None => ip::offset_ip_back(ip::last_ip(&network), size - 1).ok_or_else(too_few)?,
            Some(addr) => {
                ensure_in_network(&network, addr, RangeBound::SubnetMax)?;
                addr
            }
        };

        // Defaults and explicit values reach this point through different paths;
        // both must end up inside the network and on the subnet grid.
        ensure_on_grid(&network, size, subnet_min, RangeBound::SubnetMin)?;
        ensure_on_grid(&network, size, subnet_max, RangeBound::SubnetMax)?;

        if ip::addr_to_u128(subnet_min) > ip::addr_to_u128(subnet_max) {
            return Err(Error::EmptyRange {
                min: subnet_min,
                max: subnet_max,
            });
        }

        let backend_type = parse_backend_type(raw.backend.as_deref())?;

        debug!(
            network = %network,
            subnet_len,
            subnet_min = %subnet_min,
            subnet_max = %subnet_max,
            backend_type = %backend_type,
            "Validated network config"
        );

        Ok(Self {
            network,
            subnet_min,
            subnet_max,
            subnet_len,
            backend_type,
            backend: raw.backend,
        })
    }

    /// Shared network range
    pub fn network(&self) -> IpNet {
        self.network
    }

    /// First leasable subnet address
    pub fn subnet_min(&self) -> IpAddr {
        self.subnet_min
    }

    /// Last leasable subnet address
    pub fn subnet_max(&self) -> IpAddr {
        self.subnet_max
    }

    /// Per-host subnet prefix length
    pub fn subnet_len(&self) -> u8 {
        self.subnet_len
    }

    /// Data-plane backend discriminator
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Raw backend section, passed through unmodified
    pub fn backend(&self) -> Option<&RawValue> {
        self.backend.as_deref()
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of_net(&self.network)
    }

    /// Number of addresses in one per-host subnet
    pub fn subnet_size(&self) -> u128 {
        // resolve_subnet_len guarantees subnet_len >= 2
        1u128 << (self.family().bits() - self.subnet_len)
    }

    /// Number of leasable subnets in `[subnet_min, subnet_max]`
    pub fn subnet_count(&self) -> u128 {
        let span = ip::addr_to_u128(self.subnet_max) - ip::addr_to_u128(self.subnet_min);
        span / self.subnet_size() + 1
    }

    /// Whether `subnet` is one of the leasable grid subnets
    pub fn contains_subnet(&self, subnet: &IpNet) -> bool {
        if IpFamily::of_net(subnet) != self.family()
            || subnet.prefix_len() != self.subnet_len
            || subnet.addr() != subnet.network()
        {
            return false;
        }

        let addr = ip::addr_to_u128(subnet.addr());
        addr >= ip::addr_to_u128(self.subnet_min) && addr <= ip::addr_to_u128(self.subnet_max)
    }
}

fn ensure_in_network(network: &IpNet, addr: IpAddr, bound: RangeBound) -> Result<()> {
    if network.contains(&addr) {
        Ok(())
    } else {
        Err(Error::BoundOutOfRange {
            bound,
            addr,
            network: *network,
        })
    }
}

fn ensure_on_grid(network: &IpNet, size: u128, addr: IpAddr, bound: RangeBound) -> Result<()> {
    ensure_in_network(network, addr, bound)?;

    let offset = ip::addr_to_u128(addr) - ip::addr_to_u128(network.network());
    if offset % size != 0 {
        return Err(Error::BoundMisaligned { bound, addr });
    }
    Ok(())
}

#[derive(Deserialize)]
struct BackendProbe {
    #[serde(rename = "Type", default)]
    kind: Option<String>,
}

/// Extract the `Type` discriminator from the opaque backend section
pub fn parse_backend_type(backend: Option<&RawValue>) -> Result<String> {
    let Some(raw) = backend else {
        return Ok(DEFAULT_BACKEND_TYPE.to_string());
    };

    let probe: BackendProbe =
        serde_json::from_str(raw.get()).map_err(|e| Error::BackendDecode(e.to_string()))?;

    Ok(probe
        .kind
        .unwrap_or_else(|| DEFAULT_BACKEND_TYPE.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_small_ipv4_network_defaults() {
        let config = NetworkConfig::parse(r#"{"Network": "192.168.0.0/24"}"#).unwrap();

        assert_eq!(config.subnet_len(), 26);
        assert_eq!(config.subnet_size(), 64);
        assert_eq!(config.subnet_min(), ip("192.168.0.64"));
        assert_eq!(config.subnet_max(), ip("192.168.0.192"));
        assert_eq!(config.subnet_count(), 3);
        assert_eq!(config.backend_type(), "udp");
    }

    #[test]
    fn test_large_ipv4_network_defaults() {
        let config = NetworkConfig::parse(r#"{"Network": "10.100.0.0/16"}"#).unwrap();

        assert_eq!(config.subnet_len(), 24);
        assert_eq!(config.subnet_min(), ip("10.100.1.0"));
        assert_eq!(config.subnet_max(), ip("10.100.255.0"));
        assert_eq!(config.subnet_count(), 255);
    }

    #[test]
    fn test_network_too_small() {
        let err = NetworkConfig::parse(r#"{"Network": "10.0.0.0/29"}"#).unwrap_err();
        assert!(matches!(
            err,
            Error::NetworkTooSmall { min_prefix: 28, .. }
        ));
        assert!(err.is_validation());
    }

    #[test]
    fn test_smallest_useful_network() {
        let config = NetworkConfig::parse(r#"{"Network": "10.0.0.0/28"}"#).unwrap();
        assert_eq!(config.subnet_len(), 30);
        assert_eq!(config.subnet_min(), ip("10.0.0.4"));
        assert_eq!(config.subnet_max(), ip("10.0.0.12"));
    }

    #[test]
    fn test_explicit_subnet_len() {
        let config =
            NetworkConfig::parse(r#"{"Network": "10.0.0.0/16", "SubnetLen": 20}"#).unwrap();
        assert_eq!(config.subnet_len(), 20);
        assert_eq!(config.subnet_min(), ip("10.0.16.0"));
        assert_eq!(config.subnet_max(), ip("10.0.240.0"));
    }

    #[test]
    fn test_subnet_len_too_large() {
        let err = NetworkConfig::parse(r#"{"Network": "10.0.0.0/16", "SubnetLen": 31}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SubnetLenTooLarge {
                subnet_len: 31,
                max: 30
            }
        ));

        let err = NetworkConfig::parse(r#"{"Network": "fc00::/48", "SubnetLen": 127}"#)
            .unwrap_err();
        assert!(matches!(err, Error::SubnetLenTooLarge { max: 126, .. }));
    }

    #[test]
    fn test_too_few_subnets() {
        let err = NetworkConfig::parse(r#"{"Network": "10.0.0.0/24", "SubnetLen": 25}"#)
            .unwrap_err();
        assert!(matches!(err, Error::TooFewSubnets { subnet_len: 25, .. }));

        let config =
            NetworkConfig::parse(r#"{"Network": "10.0.0.0/24", "SubnetLen": 26}"#).unwrap();
        assert_eq!(config.subnet_count(), 3);
    }

    #[test]
    fn test_subnet_min_outside_network() {
        let err = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetLen": 24, "SubnetMin": "10.1.0.0"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BoundOutOfRange {
                bound: RangeBound::SubnetMin,
                ..
            }
        ));
    }

    #[test]
    fn test_subnet_max_outside_network() {
        let err = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetMax": "192.168.0.0"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BoundOutOfRange {
                bound: RangeBound::SubnetMax,
                ..
            }
        ));
    }

    #[test]
    fn test_bounds_off_grid() {
        let err = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetLen": 24, "SubnetMin": "10.0.1.128"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BoundMisaligned {
                bound: RangeBound::SubnetMin,
                ..
            }
        ));

        let err = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetLen": 24, "SubnetMax": "10.0.200.1"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::BoundMisaligned {
                bound: RangeBound::SubnetMax,
                ..
            }
        ));
    }

    #[test]
    fn test_explicit_bounds() {
        let config = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetMin": "10.0.10.0", "SubnetMax": "10.0.19.0"}"#,
        )
        .unwrap();
        assert_eq!(config.subnet_min(), ip("10.0.10.0"));
        assert_eq!(config.subnet_max(), ip("10.0.19.0"));
        assert_eq!(config.subnet_count(), 10);
    }

    #[test]
    fn test_zero_bounds_mean_default() {
        let config = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetMin": "0.0.0.0", "SubnetMax": "0.0.0.0"}"#,
        )
        .unwrap();
        assert_eq!(config.subnet_min(), ip("10.0.1.0"));
        assert_eq!(config.subnet_max(), ip("10.0.255.0"));
    }

    #[test]
    fn test_inverted_bounds() {
        let err = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetMin": "10.0.20.0", "SubnetMax": "10.0.10.0"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyRange { .. }));
    }

    #[test]
    fn test_ipv6_defaults() {
        let config = NetworkConfig::parse(r#"{"Network": "fc00::/48"}"#).unwrap();
        assert_eq!(config.family(), IpFamily::V6);
        assert_eq!(config.subnet_len(), 120);
        assert_eq!(config.subnet_min(), ip("fc00::100"));
        assert_eq!(config.subnet_max(), ip("fc00:0:0:ffff:ffff:ffff:ffff:ff00"));

        let config = NetworkConfig::parse(r#"{"Network": "fc00::/120"}"#).unwrap();
        assert_eq!(config.subnet_len(), 122);
        assert_eq!(config.subnet_min(), ip("fc00::40"));
        assert_eq!(config.subnet_max(), ip("fc00::c0"));

        let err = NetworkConfig::parse(r#"{"Network": "fc00::/125"}"#).unwrap_err();
        assert!(matches!(err, Error::NetworkTooSmall { min_prefix: 124, .. }));
    }

    #[test]
    fn test_ipv6_bound_family_mismatch() {
        let err = NetworkConfig::parse(r#"{"Network": "fc00::/48", "SubnetMin": "10.0.0.0"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::BoundOutOfRange { .. }));
    }

    #[test]
    fn test_network_host_bits_truncated() {
        let config = NetworkConfig::parse(r#"{"Network": "10.1.2.3/16"}"#).unwrap();
        assert_eq!(config.network().to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_backend_type() {
        let config = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/8", "Backend": {"Type": "vxlan", "VNI": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.backend_type(), "vxlan");
        assert_eq!(
            config.backend().map(|b| b.get()),
            Some(r#"{"Type": "vxlan", "VNI": 1}"#)
        );

        let config = NetworkConfig::parse(r#"{"Network": "10.0.0.0/8", "Backend": null}"#)
            .unwrap();
        assert_eq!(config.backend_type(), "udp");
    }

    #[test]
    fn test_malformed_backend() {
        let err = NetworkConfig::parse(r#"{"Network": "10.0.0.0/8", "Backend": "vxlan"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::BackendDecode(_)));

        let err =
            NetworkConfig::parse(r#"{"Network": "10.0.0.0/8", "Backend": {"Type": 5}}"#)
                .unwrap_err();
        assert!(matches!(err, Error::BackendDecode(_)));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            NetworkConfig::parse("not json"),
            Err(Error::MalformedConfig(_))
        ));
        assert!(matches!(
            NetworkConfig::parse(r#"{"SubnetLen": 24}"#),
            Err(Error::MalformedConfig(_))
        ));
        assert!(matches!(
            NetworkConfig::parse(r#"{"Network": "10.0.0.0/33"}"#),
            Err(Error::MalformedConfig(_))
        ));
    }

    #[test]
    fn test_contains_subnet() {
        let config = NetworkConfig::parse(r#"{"Network": "10.0.0.0/16"}"#).unwrap();

        assert!(config.contains_subnet(&"10.0.1.0/24".parse().unwrap()));
        assert!(config.contains_subnet(&"10.0.255.0/24".parse().unwrap()));
        // reserved first subnet
        assert!(!config.contains_subnet(&"10.0.0.0/24".parse().unwrap()));
        assert!(!config.contains_subnet(&"10.0.1.0/25".parse().unwrap()));
        assert!(!config.contains_subnet(&"10.0.1.5/24".parse().unwrap()));
        assert!(!config.contains_subnet(&"10.1.0.0/24".parse().unwrap()));
        assert!(!config.contains_subnet(&"fc00::/24".parse().unwrap()));
    }

    #[test]
    fn test_serialized_config_reparses() {
        let config = NetworkConfig::parse(
            r#"{"Network": "10.0.0.0/16", "SubnetLen": 20, "Backend": {"Type": "host-gw"}}"#,
        )
        .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let reparsed = NetworkConfig::parse(&json).unwrap();

        assert_eq!(reparsed.network(), config.network());
        assert_eq!(reparsed.subnet_min(), config.subnet_min());
        assert_eq!(reparsed.subnet_max(), config.subnet_max());
        assert_eq!(reparsed.subnet_len(), config.subnet_len());
        assert_eq!(reparsed.backend_type(), "host-gw");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("net-conf.json");
        std::fs::write(&path, r#"{"Network": "10.244.0.0/16"}"#).unwrap();

        let config = NetworkConfig::load(&path).unwrap();
        assert_eq!(config.subnet_min(), ip("10.244.1.0"));

        let missing = NetworkConfig::load(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::MalformedConfig(_))));
    }
}
