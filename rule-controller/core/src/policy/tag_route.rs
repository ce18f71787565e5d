use super::{ParamMatch, Policy, PolicyToClient};
use crate::Kind;
use serde::{Deserialize, Serialize};

/// Routes requests to providers grouped by tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagRoute {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<TagRouteSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TagRouteSpec {
    pub priority: i32,
    pub enabled: bool,
    pub force: bool,
    pub runtime: bool,
    pub key: String,
    pub tags: Vec<Tag>,
    pub config_version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    pub name: String,
    #[serde(rename = "match")]
    pub matches: Vec<ParamMatch>,
    pub addresses: Vec<String>,
}

impl Policy for TagRoute {
    const KIND: Kind = Kind::TagRoute;

    type ToClient<'a> = PolicyToClient<'a, TagRouteSpec>;

    fn to_client(&self) -> Option<Self::ToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(PolicyToClient {
            name: &self.name,
            spec,
        })
    }
}
