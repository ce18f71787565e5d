#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Data model shared by the rule controller: rule kinds, resolved client
//! endpoints, selector matching, the per-kind policy types and the wire
//! envelope exchanged with data plane clients.

mod endpoint;
mod kind;
mod origin;
pub mod policy;
mod selector;
mod wire;

pub use self::{
    endpoint::{Endpoint, KubernetesEnv},
    kind::{Kind, UnknownKind},
    origin::{ExactError, Origin, ToClient},
    policy::Policy,
    selector::{Criteria, Extend, Selector},
    wire::{ObserveRequest, ObserveResponse},
};
pub use ipnet::IpNet;
