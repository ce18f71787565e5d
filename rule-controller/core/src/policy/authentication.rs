use super::Policy;
use crate::{Endpoint, Kind, Selector};
use serde::{Deserialize, Serialize};

/// Configures how workloads authenticate their peers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Authentication {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<AuthenticationSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationSpec {
    pub action: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selector: Vec<Selector>,
    #[serde(rename = "PortLevel", skip_serializing_if = "Vec::is_empty")]
    pub port_level: Vec<PortLevel>,
}

/// Overrides the action for a single port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortLevel {
    #[serde(skip_serializing_if = "is_zero_port")]
    pub port: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationToClient<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub name: &'a str,
    pub spec: AuthenticationSpecToClient<'a>,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationSpecToClient<'a> {
    pub action: &'a str,
    #[serde(rename = "PortLevel", skip_serializing_if = "super::is_empty_slice")]
    pub port_level: &'a [PortLevel],
}

// === impl Authentication ===

impl Policy for Authentication {
    const KIND: Kind = Kind::Authentication;

    type ToClient<'a> = AuthenticationToClient<'a>;

    /// Every selector must match the endpoint.
    fn matches(&self, endpoint: Option<&Endpoint>) -> bool {
        self.spec
            .as_ref()
            .map_or(true, |spec| spec.selector.iter().all(|s| s.matches(endpoint)))
    }

    fn to_client(&self) -> Option<AuthenticationToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(AuthenticationToClient {
            name: &self.name,
            spec: AuthenticationSpecToClient {
                action: &spec.action,
                port_level: &spec.port_level,
            },
        })
    }
}

fn is_zero_port(port: &i32) -> bool {
    *port == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KubernetesEnv;

    fn in_namespace(ns: &str) -> Endpoint {
        Endpoint {
            id: "test".to_string(),
            kubernetes_env: Some(KubernetesEnv {
                namespace: ns.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn policy(selector: Vec<Selector>) -> Authentication {
        Authentication {
            name: "test".to_string(),
            spec: Some(AuthenticationSpec {
                action: "STRICT".to_string(),
                selector,
                port_level: vec![PortLevel {
                    port: 8080,
                    action: "PERMISSIVE".to_string(),
                }],
            }),
        }
    }

    #[test]
    fn every_selector_must_match() {
        let ns = |n: &str| Selector {
            namespaces: vec![n.to_string()],
            ..Default::default()
        };
        let not_ns = |n: &str| Selector {
            not_namespaces: vec![n.to_string()],
            ..Default::default()
        };

        assert!(policy(vec![]).matches(Some(&in_namespace("a"))));
        assert!(policy(vec![ns("a"), not_ns("b")]).matches(Some(&in_namespace("a"))));
        assert!(!policy(vec![ns("a"), ns("b")]).matches(Some(&in_namespace("a"))));
        assert!(policy(vec![ns("a"), ns("b")]).matches(None));
    }

    #[test]
    fn client_shape_strips_selectors() {
        let p = policy(vec![Selector {
            namespaces: vec!["a".to_string()],
            ..Default::default()
        }]);
        let json = serde_json::to_string(&p.to_client().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"name":"test","spec":{"action":"STRICT","PortLevel":[{"port":8080,"action":"PERMISSIVE"}]}}"#
        );

        let bare = Authentication {
            name: "bare".to_string(),
            spec: Some(AuthenticationSpec::default()),
        };
        assert_eq!(
            serde_json::to_string(&bare.to_client().unwrap()).unwrap(),
            r#"{"name":"bare","spec":{"action":""}}"#
        );
    }

    #[test]
    fn no_spec_is_never_sent() {
        assert!(Authentication::default().to_client().is_none());
    }
}
