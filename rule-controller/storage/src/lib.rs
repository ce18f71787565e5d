#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Rule distribution state.
//!
//! Each rule kind has a single [`Handler`] that owns the kind's policies. Every
//! change produces a new immutable [`PolicyOrigin`] with the next revision,
//! which is published into the process-wide [`Storage`]. Storage fans the
//! change out to every connected client that has subscribed to the kind.
//!
//! Each client session is a [`Connection`] driven by two tasks: a receive
//! loop that processes subscriptions and acknowledgements, and a dispatch loop
//! that computes the client's view of a kind and pushes it. At most one push
//! per (connection, kind) is unacknowledged at a time. Changes that arrive
//! while a push is in flight only mark the kind dirty; once the client
//! acknowledges, the current state is read again and pushed if it differs from
//! what the client already has.

mod connection;
mod metrics;
mod queue;
mod registry;
mod storage;

#[cfg(test)]
mod tests;

pub use self::{
    connection::{
        AckState, Connection, ConnectionConfig, ConnectionHandle, ConnectionId,
        EndpointConnection, PushStatus, SendError,
    },
    metrics::{register_collector, StorageMetrics},
    registry::{Event, Handler, PolicyOrigin},
    storage::{SharedStorage, Storage},
};
