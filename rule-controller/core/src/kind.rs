use std::{fmt, str::FromStr};

/// A category of rules distributed to data plane clients.
///
/// Each kind is identified on the wire by a stable, versioned string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Authentication,
    Authorization,
    ConditionRoute,
    TagRoute,
    DynamicConfig,
    ServiceMapping,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown rule kind: {0:?}")]
pub struct UnknownKind(pub String);

// === impl Kind ===

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Authentication,
        Kind::Authorization,
        Kind::ConditionRoute,
        Kind::TagRoute,
        Kind::DynamicConfig,
        Kind::ServiceMapping,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication/v1beta1",
            Self::Authorization => "authorization/v1beta1",
            Self::ConditionRoute => "conditionroute/v1beta1",
            Self::TagRoute => "tagroute/v1beta1",
            Self::DynamicConfig => "dynamicconfig/v1beta1",
            Self::ServiceMapping => "servicemapping/v1beta1",
        }
    }

    /// The short, unversioned name of the kind (e.g. `authorization`).
    pub fn name(&self) -> &'static str {
        let s = self.as_str();
        s.split_once('/').map(|(name, _)| name).unwrap_or(s)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}
