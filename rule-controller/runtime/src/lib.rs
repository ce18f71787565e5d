#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use rule_controller_core as core;
pub use rule_controller_grpc as grpc;
pub use rule_controller_storage as storage;

mod admin;
mod args;
mod handlers;

pub use self::{
    admin::Admin,
    args::Args,
    handlers::{Handlers, RuleSink, SinkError},
};
