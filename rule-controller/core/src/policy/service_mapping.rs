use super::{Policy, PolicyToClient};
use crate::Kind;
use serde::{Deserialize, Serialize};

/// Maps an interface to the applications that provide it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceMapping {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<ServiceMappingSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceMappingSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interface_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub application_names: Vec<String>,
}

impl Policy for ServiceMapping {
    const KIND: Kind = Kind::ServiceMapping;

    type ToClient<'a> = PolicyToClient<'a, ServiceMappingSpec>;

    fn to_client(&self) -> Option<Self::ToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(PolicyToClient {
            name: &self.name,
            spec,
        })
    }
}
