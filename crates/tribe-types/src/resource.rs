//! Shareable resources.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ParseEnumError, ResourceId, RowState, Timestamp, UserId};

/// What kind of entity a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    List,
    Activity,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::List => "list",
            ResourceKind::Activity => "activity",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(ResourceKind::List),
            "activity" => Ok(ResourceKind::Activity),
            other => Err(ParseEnumError {
                kind: "resource kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Who can see a resource.
///
/// `Shared` is maintained by the sharing state machine: a private resource
/// becomes shared while at least one share is visible and drops back to
/// private afterwards. `Public` is only ever set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Shared,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Shared => "shared",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "shared" => Ok(Visibility::Shared),
            "public" => Ok(Visibility::Public),
            other => Err(ParseEnumError {
                kind: "visibility",
                value: other.to_string(),
            }),
        }
    }
}

/// A list or activity that can be owned and shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    /// User that created the resource.
    pub created_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub state: RowState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        for kind in [ResourceKind::List, ResourceKind::Activity] {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("folder".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_visibility_default_is_private() {
        assert_eq!(Visibility::default(), Visibility::Private);
        assert_eq!("public".parse::<Visibility>(), Ok(Visibility::Public));
        let err = "hidden".parse::<Visibility>().expect_err("unknown label");
        assert_eq!(err.to_string(), "unknown visibility 'hidden'");
    }
}
