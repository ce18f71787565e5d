use super::{is_zero, Policy};
use crate::{Criteria, Endpoint, Extend, Kind};
use serde::{Deserialize, Serialize};

/// Grants or denies requests to the workloads selected by each rule's target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Authorization {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<AuthorizationSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(skip_serializing_if = "is_zero")]
    pub samples: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub order: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub match_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Target>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

/// The callers a rule applies to. Evaluated by the data plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_principals: Vec<String>,
    #[serde(rename = "sourceExtends", skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<Extend>,
    #[serde(rename = "sourceNotExtends", skip_serializing_if = "Vec::is_empty")]
    pub not_extends: Vec<Extend>,
}

/// The workloads a rule is distributed to. Evaluated by the control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Target {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_namespaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ip_blocks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_principals: Vec<String>,
    #[serde(rename = "targetExtends", skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<Extend>,
    #[serde(rename = "targetNotExtends", skip_serializing_if = "Vec::is_empty")]
    pub not_extends: Vec<Extend>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Condition {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ValueMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_values: Vec<ValueMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueMatch {
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizationToClient<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub name: &'a str,
    pub spec: AuthorizationSpecToClient<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationSpecToClient<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    pub action: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleToClient<'a>>,
    #[serde(skip_serializing_if = "is_zero")]
    pub samples: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub order: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub match_type: &'a str,
}

/// A rule without its target.
#[derive(Debug, Serialize)]
pub struct RuleToClient<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<&'a Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<&'a Condition>,
}

// === impl Authorization ===

impl Policy for Authorization {
    const KIND: Kind = Kind::Authorization;

    type ToClient<'a> = AuthorizationToClient<'a>;

    /// Every rule's target must match the endpoint. Rules without a target
    /// match everyone.
    fn matches(&self, endpoint: Option<&Endpoint>) -> bool {
        self.spec.as_ref().map_or(true, |spec| {
            spec.rules
                .iter()
                .all(|rule| rule.to.as_ref().map_or(true, |to| to.matches(endpoint)))
        })
    }

    fn to_client(&self) -> Option<AuthorizationToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(AuthorizationToClient {
            name: &self.name,
            spec: AuthorizationSpecToClient {
                action: &spec.action,
                rules: spec
                    .rules
                    .iter()
                    .map(|rule| RuleToClient {
                        from: rule.from.as_ref(),
                        when: rule.when.as_ref(),
                    })
                    .collect(),
                samples: spec.samples,
                order: spec.order,
                match_type: &spec.match_type,
            },
        })
    }
}

// === impl Target ===

impl Target {
    pub fn criteria(&self) -> Criteria<'_> {
        Criteria {
            namespaces: &self.namespaces,
            not_namespaces: &self.not_namespaces,
            ip_blocks: &self.ip_blocks,
            not_ip_blocks: &self.not_ip_blocks,
            principals: &self.principals,
            not_principals: &self.not_principals,
            extends: &self.extends,
            not_extends: &self.not_extends,
        }
    }

    pub fn matches(&self, endpoint: Option<&Endpoint>) -> bool {
        self.criteria().matches(endpoint)
    }
}
