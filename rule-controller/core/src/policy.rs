//! Per-kind policy types.
//!
//! Every kind stores a named policy with an optional spec. Policies without a
//! spec are kept by the registry but never sent to clients. Each kind also
//! defines the shape sent to clients, which may strip server-only fields such
//! as the selectors used for matching.

use crate::{Endpoint, Kind};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

pub mod authentication;
pub mod authorization;
pub mod condition_route;
pub mod dynamic_config;
pub mod service_mapping;
pub mod tag_route;

pub use self::{
    authentication::Authentication, authorization::Authorization,
    condition_route::ConditionRoute, dynamic_config::DynamicConfig,
    service_mapping::ServiceMapping, tag_route::TagRoute,
};

/// A rule object of a single kind, as stored by the registry.
pub trait Policy:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: Kind;

    /// The shape sent to data plane clients.
    type ToClient<'a>: Serialize
    where
        Self: 'a;

    /// Indicates whether the policy applies to an endpoint. `None` matches
    /// every policy.
    fn matches(&self, _endpoint: Option<&Endpoint>) -> bool {
        true
    }

    /// Returns the client-facing shape, or `None` when the policy has no spec.
    fn to_client(&self) -> Option<Self::ToClient<'_>>;
}

/// The client-facing shape of kinds that are sent as stored.
#[derive(Debug, Serialize)]
pub struct PolicyToClient<'a, S> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub name: &'a str,
    pub spec: &'a S,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringMatch {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub exact: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub regex: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub noempty: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub empty: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wildcard: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamMatch {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<StringMatch>,
}

fn is_empty_slice<T>(s: &&[T]) -> bool {
    s.is_empty()
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(v: &f32) -> bool {
    *v == 0.0
}
