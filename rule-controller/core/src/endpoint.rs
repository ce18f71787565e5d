use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The resolved identity of a connected data plane client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub ips: Vec<String>,
    #[serde(rename = "spiffeID")]
    pub spiffe_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_env: Option<KubernetesEnv>,
}

/// Kubernetes workload metadata attached to an endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubernetesEnv {
    pub namespace: String,
    pub pod_name: String,
    pub pod_labels: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
}

// === impl Endpoint ===

impl Endpoint {
    pub fn namespace(&self) -> Option<&str> {
        self.kubernetes_env.as_ref().map(|env| env.namespace.as_str())
    }

    pub(crate) fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Resolves a dotted path (e.g. `kubernetesEnv.podLabels.app`) against an
/// endpoint's JSON form and compares the result with `expected`.
///
/// Strings compare by value, other scalars by their JSON text. A missing path
/// (or `null`) resolves to the empty string.
pub(crate) fn path_matches(json: &Value, path: &str, expected: &str) -> bool {
    let pointer = path.split('.').fold(String::new(), |mut pointer, segment| {
        pointer.push('/');
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
        pointer
    });
    match json.pointer(&pointer) {
        None | Some(Value::Null) => expected.is_empty(),
        Some(Value::String(s)) => s == expected,
        Some(v) => v.to_string() == expected,
    }
}
