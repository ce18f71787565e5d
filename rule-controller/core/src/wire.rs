use crate::Kind;

/// A client message on an observe stream.
///
/// An empty nonce (re)subscribes to `kind`; any other value acknowledges the
/// response that carried that nonce.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObserveRequest {
    pub nonce: String,

    /// The raw kind identifier, as sent by the client.
    pub kind: String,
}

/// A rule snapshot pushed to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObserveResponse {
    pub nonce: String,
    pub kind: Kind,
    pub revision: i64,
    pub data: String,
}

// === impl ObserveRequest ===

impl ObserveRequest {
    pub fn listen(kind: Kind) -> Self {
        Self {
            nonce: String::new(),
            kind: kind.as_str().to_string(),
        }
    }

    pub fn ack(kind: Kind, nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
            kind: kind.as_str().to_string(),
        }
    }

    pub fn is_ack(&self) -> bool {
        !self.nonce.is_empty()
    }
}
