//! Protobuf messages exchanged on `dds.RuleService/Observe`.

use rule_controller_core as model;

/// A subscription (empty nonce) or acknowledgement sent by a client.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ObserveRequest {
    #[prost(string, tag = "1")]
    pub nonce: String,

    /// The rule kind, e.g. `authorization/v1beta1`.
    #[prost(string, tag = "2")]
    pub r#type: String,
}

/// A rule snapshot pushed to a client.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ObserveResponse {
    #[prost(string, tag = "1")]
    pub nonce: String,

    #[prost(string, tag = "2")]
    pub r#type: String,

    #[prost(int64, tag = "3")]
    pub revision: i64,

    /// A JSON array of the rules that apply to the client.
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

impl From<ObserveRequest> for model::ObserveRequest {
    fn from(ObserveRequest { nonce, r#type }: ObserveRequest) -> Self {
        Self {
            nonce,
            kind: r#type,
        }
    }
}

impl From<model::ObserveResponse> for ObserveResponse {
    fn from(rsp: model::ObserveResponse) -> Self {
        Self {
            nonce: rsp.nonce,
            r#type: rsp.kind.as_str().to_string(),
            revision: rsp.revision,
            data: rsp.data.into_bytes(),
        }
    }
}
