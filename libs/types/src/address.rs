//! Proxy address taxonomy and discovery query types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The network name proxies advertise by default.
pub const DEFAULT_NETWORK: &str = "default";

/// Kind of endpoint a proxy advertises on a network.
///
/// Callers asking for an address type outside this set get a hard input
/// error; there is no fallback interpretation of an unknown type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// The primary client-facing endpoint.
    Default,
    /// The intra-cluster RPC endpoint.
    InternalRpc,
    /// The HTTP monitoring/diagnostics endpoint.
    MonitoringHttp,
}

impl AddressType {
    /// Canonical string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::InternalRpc => "internal_rpc",
            Self::MonitoringHttp => "monitoring_http",
        }
    }
}

impl Default for AddressType {
    fn default() -> Self {
        Self::InternalRpc
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an address type string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address type: {0:?}")]
pub struct ParseAddressTypeError(pub String);

impl FromStr for AddressType {
    type Err = ParseAddressTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "internal_rpc" => Ok(Self::InternalRpc),
            "monitoring_http" => Ok(Self::MonitoringHttp),
            other => Err(ParseAddressTypeError(other.to_string())),
        }
    }
}

/// A discovery query: which endpoints of the live proxy set to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Endpoint kind to project out of each proxy record.
    #[serde(default)]
    pub address_type: AddressType,

    /// Network to select endpoints from. An unmatched network yields an
    /// empty result, never an error.
    #[serde(default = "default_network")]
    pub network_name: String,

    /// Restrict the result to proxies carrying this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

impl Default for DiscoveryRequest {
    fn default() -> Self {
        Self {
            address_type: AddressType::default(),
            network_name: default_network(),
            role: None,
        }
    }
}

impl DiscoveryRequest {
    /// Query for the given address type on the default network.
    pub fn with_address_type(address_type: AddressType) -> Self {
        Self {
            address_type,
            ..Self::default()
        }
    }
}

/// The discovery result: an unordered, possibly empty set of addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub proxies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_type_round_trip() {
        for ty in [
            AddressType::Default,
            AddressType::InternalRpc,
            AddressType::MonitoringHttp,
        ] {
            assert_eq!(ty.as_str().parse::<AddressType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_address_type_is_an_error() {
        let err = "invalid".parse::<AddressType>().unwrap_err();
        assert_eq!(err, ParseAddressTypeError("invalid".to_string()));
    }

    #[test]
    fn test_discovery_request_defaults() {
        let req: DiscoveryRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.address_type, AddressType::InternalRpc);
        assert_eq!(req.network_name, DEFAULT_NETWORK);
        assert!(req.role.is_none());
    }

    #[test]
    fn test_discovery_request_serde_names() {
        let req = DiscoveryRequest {
            address_type: AddressType::MonitoringHttp,
            network_name: "default".to_string(),
            role: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"address_type\":\"monitoring_http\""));
    }
}
