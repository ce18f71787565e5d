use crate::{endpoint::path_matches, Endpoint, IpNet};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::warn;

/// A key/value pair matched against the JSON form of an endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extend {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
}

/// Selects the workloads an authentication policy applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Selector {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_principals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<Extend>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_extends: Vec<Extend>,
}

/// A borrowed view over the eight match criteria shared by every selector
/// and target shape.
///
/// Every non-empty criterion must be satisfied. Inclusion lists pass when any
/// element matches; exclusion lists fail when any element matches.
#[derive(Copy, Clone, Debug, Default)]
pub struct Criteria<'a> {
    pub namespaces: &'a [String],
    pub not_namespaces: &'a [String],
    pub ip_blocks: &'a [String],
    pub not_ip_blocks: &'a [String],
    pub principals: &'a [String],
    pub not_principals: &'a [String],
    pub extends: &'a [Extend],
    pub not_extends: &'a [Extend],
}

const SPIFFE_SCHEME: &str = "spiffe://";

// === impl Selector ===

impl Selector {
    pub fn criteria(&self) -> Criteria<'_> {
        Criteria {
            namespaces: &self.namespaces,
            not_namespaces: &self.not_namespaces,
            ip_blocks: &self.ip_blocks,
            not_ip_blocks: &self.not_ip_blocks,
            principals: &self.principals,
            not_principals: &self.not_principals,
            extends: &self.extends,
            not_extends: &self.not_extends,
        }
    }

    pub fn matches(&self, endpoint: Option<&Endpoint>) -> bool {
        self.criteria().matches(endpoint)
    }
}

// === impl Criteria ===

impl Criteria<'_> {
    /// Evaluates the criteria against an endpoint. No endpoint matches
    /// everything.
    pub fn matches(&self, endpoint: Option<&Endpoint>) -> bool {
        let Some(endpoint) = endpoint else {
            return true;
        };

        self.matches_namespace(endpoint)
            && self.matches_ip_blocks(endpoint)
            && self.matches_principals(endpoint)
            && self.matches_extends(endpoint)
    }

    fn matches_namespace(&self, endpoint: &Endpoint) -> bool {
        let namespace = endpoint.namespace();
        let listed = |list: &[String]| namespace.is_some_and(|ns| list.iter().any(|n| n == ns));

        if !self.namespaces.is_empty() && !listed(self.namespaces) {
            return false;
        }
        !listed(self.not_namespaces)
    }

    fn matches_ip_blocks(&self, endpoint: &Endpoint) -> bool {
        if !self.ip_blocks.is_empty() && !contains_any(self.ip_blocks, &endpoint.ips) {
            return false;
        }
        !contains_any(self.not_ip_blocks, &endpoint.ips)
    }

    fn matches_principals(&self, endpoint: &Endpoint) -> bool {
        let id = endpoint.spiffe_id.as_str();
        let unscoped = id.strip_prefix(SPIFFE_SCHEME);
        let listed = |list: &[String]| {
            list.iter()
                .any(|p| p == id || unscoped.is_some_and(|u| p == u))
        };

        if !self.principals.is_empty() && !listed(self.principals) {
            return false;
        }
        !listed(self.not_principals)
    }

    fn matches_extends(&self, endpoint: &Endpoint) -> bool {
        if self.extends.is_empty() && self.not_extends.is_empty() {
            return true;
        }

        let json = match endpoint.to_json() {
            Ok(json) => json,
            Err(error) => {
                warn!(%error, endpoint = %endpoint.id, "Failed to encode endpoint");
                return false;
            }
        };
        let listed = |list: &[Extend]| {
            list.iter()
                .any(|e| path_matches(&json, &e.key, &e.value))
        };

        if !self.extends.is_empty() && !listed(self.extends) {
            return false;
        }
        !listed(self.not_extends)
    }
}

/// Indicates whether any of the endpoint's addresses falls within any of the
/// blocks. Blocks and addresses that fail to parse are logged and skipped.
fn contains_any(blocks: &[String], ips: &[String]) -> bool {
    blocks.iter().any(|block| {
        let net = match block.parse::<IpNet>() {
            Ok(net) => net,
            Err(error) => {
                warn!(%error, %block, "Ignoring invalid IP block");
                return false;
            }
        };
        ips.iter().any(|ip| match ip.parse::<IpAddr>() {
            Ok(addr) => net.contains(&addr),
            Err(error) => {
                warn!(%error, %ip, "Ignoring invalid endpoint IP");
                false
            }
        })
    })
}
