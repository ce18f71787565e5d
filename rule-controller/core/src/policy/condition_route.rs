use super::{Policy, PolicyToClient};
use crate::Kind;
use serde::{Deserialize, Serialize};

/// Filters the providers a consumer may route to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionRoute {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub spec: Option<ConditionRouteSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionRouteSpec {
    pub priority: i32,
    pub enabled: bool,
    pub force: bool,
    pub runtime: bool,
    pub key: String,
    pub scope: String,
    pub conditions: Vec<String>,
    pub config_version: String,
}

impl Policy for ConditionRoute {
    const KIND: Kind = Kind::ConditionRoute;

    type ToClient<'a> = PolicyToClient<'a, ConditionRouteSpec>;

    fn to_client(&self) -> Option<Self::ToClient<'_>> {
        let spec = self.spec.as_ref()?;
        Some(PolicyToClient {
            name: &self.name,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Endpoint;

    #[test]
    fn sent_as_stored() {
        let route = ConditionRoute {
            name: "test2".to_string(),
            spec: Some(ConditionRouteSpec {
                key: "test-key".to_string(),
                scope: "service".to_string(),
                conditions: vec!["method=sayHello => region=hangzhou".to_string()],
                ..Default::default()
            }),
        };
        assert!(route.matches(Some(&Endpoint::default())));

        let json = serde_json::to_string(&route.to_client().unwrap()).unwrap();
        let decoded: ConditionRoute = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, route);
        assert!(json.contains(r#""configVersion":"""#), "{json}");
    }
}
