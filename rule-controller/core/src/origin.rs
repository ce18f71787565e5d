use crate::{Endpoint, Kind};
use std::fmt;

/// The authoritative, revisioned state of one rule kind.
///
/// An origin is immutable once published: every change to the kind produces
/// a new origin with the next revision.
pub trait Origin: fmt::Debug + Send + Sync {
    fn kind(&self) -> Kind;

    fn revision(&self) -> i64;

    /// Serializes the policies that apply to `endpoint` in their client-facing
    /// shape. `None` selects every policy.
    fn exact(&self, endpoint: Option<&Endpoint>) -> Result<ToClient, ExactError>;
}

/// An endpoint-filtered snapshot of an [`Origin`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToClient {
    pub kind: Kind,
    pub revision: i64,

    /// A JSON array of the matching policies.
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode {kind} rules: {source}")]
pub struct ExactError {
    kind: Kind,
    #[source]
    source: serde_json::Error,
}

// === impl ExactError ===

impl ExactError {
    pub fn new(kind: Kind, source: serde_json::Error) -> Self {
        Self { kind, source }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
}
