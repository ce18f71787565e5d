#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The `dds.RuleService` gRPC API.
//!
//! Each `Observe` call is a bidirectional stream: the client subscribes to
//! rule kinds and acknowledges pushes, and the server streams rule snapshots
//! for the resolved endpoint.

pub mod metrics;
mod observe;
pub mod proto;
mod resolver;


pub use self::{
    observe::RuleServer,
    resolver::{PeerResolver, ResolveEndpoint, ResolveError, ENDPOINT_HEADER},
};

/// Generated client and server bindings.
pub mod api {
    #![allow(clippy::all, rust_2018_idioms, unused_qualifications)]

    include!(concat!(env!("OUT_DIR"), "/dds.RuleService.rs"));

    pub use self::{
        rule_service_client::RuleServiceClient,
        rule_service_server::{RuleService, RuleServiceServer},
    };
}
