use rule_controller_core::Endpoint;
use std::net::SocketAddr;
use tonic::metadata::MetadataMap;

/// Request metadata carrying a client-asserted endpoint as JSON.
pub const ENDPOINT_HEADER: &str = "x-rule-endpoint";

/// Determines the endpoint identity of an `Observe` caller.
pub trait ResolveEndpoint: Send + Sync + 'static {
    fn resolve(
        &self,
        remote_addr: Option<SocketAddr>,
        metadata: &MetadataMap,
    ) -> Result<Endpoint, ResolveError>;
}

/// Identifies clients by their socket address, optionally trusting an
/// endpoint asserted in request metadata.
#[derive(Clone, Debug, Default)]
pub struct PeerResolver {
    trust_endpoint_header: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("remote address is unknown")]
    UnknownPeer,

    #[error("x-rule-endpoint is not valid ASCII")]
    HeaderEncoding(#[from] tonic::metadata::errors::ToStrError),

    #[error("invalid x-rule-endpoint: {0}")]
    InvalidHeader(#[from] serde_json::Error),
}

// === impl PeerResolver ===

impl PeerResolver {
    pub fn new(trust_endpoint_header: bool) -> Self {
        Self {
            trust_endpoint_header,
        }
    }
}

impl ResolveEndpoint for PeerResolver {
    fn resolve(
        &self,
        remote_addr: Option<SocketAddr>,
        metadata: &MetadataMap,
    ) -> Result<Endpoint, ResolveError> {
        let addr = remote_addr.ok_or(ResolveError::UnknownPeer)?;

        if self.trust_endpoint_header {
            if let Some(value) = metadata.get(ENDPOINT_HEADER) {
                let mut endpoint = serde_json::from_str::<Endpoint>(value.to_str()?)?;
                if endpoint.id.is_empty() {
                    endpoint.id = addr.to_string();
                }
                if endpoint.ips.is_empty() {
                    endpoint.ips = vec![addr.ip().to_string()];
                }
                return Ok(endpoint);
            }
        }

        Ok(Endpoint {
            id: addr.to_string(),
            ips: vec![addr.ip().to_string()],
            ..Default::default()
        })
    }
}

// === impl ResolveError ===

impl ResolveError {
    /// A stable label describing why resolution failed.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownPeer => "unknown_peer",
            Self::HeaderEncoding(_) => "header_encoding",
            Self::InvalidHeader(_) => "invalid_header",
        }
    }
}

impl From<ResolveError> for tonic::Status {
    fn from(error: ResolveError) -> Self {
        tonic::Status::unauthenticated(error.to_string())
    }
}
