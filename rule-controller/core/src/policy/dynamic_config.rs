use super::{is_false, ParamMatch, Policy, PolicyToClient, StringMatch};
use crate::Kind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overrides service or application parameters at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<DynamicConfigSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DynamicConfigSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub config_version: String,
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<OverrideConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverrideConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub side: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provider_addresses: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matches: Option<ConditionMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ListStringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ListStringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub param: Vec<ParamMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressMatch {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wildcard: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cird: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub exact: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListStringMatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub oneof: Vec<StringMatch>,
}

impl Policy for DynamicConfig {
    const KIND: Kind = Kind::DynamicConfig;

    type ToClient<'a> = PolicyToClient<'a, DynamicConfigSpec>;

    fn to_client(&self) -> Option<Self::ToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(PolicyToClient {
            name: &self.name,
            spec,
        })
    }
}
