//! Ownership and share records.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GroupId, ParseEnumError, ResourceId, RowState, ShareId, Timestamp, UserId};

/// Whether a principal is an individual or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user",
            PrincipalKind::Group => "group",
        }
    }
}

impl FromStr for PrincipalKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PrincipalKind::User),
            "group" => Ok(PrincipalKind::Group),
            other => Err(ParseEnumError {
                kind: "principal kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A user or group that can own a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Principal {
    User(UserId),
    Group(GroupId),
}

impl Principal {
    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User(_) => PrincipalKind::User,
            Principal::Group(_) => PrincipalKind::Group,
        }
    }

    /// Raw identifier, meaningful only together with [`Principal::kind`].
    pub fn id(&self) -> Uuid {
        match self {
            Principal::User(id) => id.0,
            Principal::Group(id) => id.0,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.id().is_nil()
    }
}

/// Why an owner row exists.
///
/// `Share` rows were promoted by the sharing state machine and go away with
/// the last share for the pair; `Direct` rows only go away by explicit
/// removal or a resource delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerOrigin {
    Direct,
    Share,
}

impl OwnerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerOrigin::Direct => "direct",
            OwnerOrigin::Share => "share",
        }
    }
}

impl FromStr for OwnerOrigin {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(OwnerOrigin::Direct),
            "share" => Ok(OwnerOrigin::Share),
            other => Err(ParseEnumError {
                kind: "owner origin",
                value: other.to_string(),
            }),
        }
    }
}

/// Standing access of a principal to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub resource_id: ResourceId,
    pub principal: Principal,
    pub origin: OwnerOrigin,
    pub created_at: Timestamp,
    pub state: RowState,
}

/// A time-scoped grant of a resource to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub resource_id: ResourceId,
    pub group_id: GroupId,
    /// User that granted (or last re-granted) the share.
    pub granted_by: UserId,
    pub expires_at: Option<Timestamp>,
    /// Starts at 1 and grows by one on every transition of this row.
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub state: RowState,
}

impl Share {
    /// The one visibility rule: not deleted and not yet expired.
    ///
    /// The SQL filter in `tribe-db` mirrors this predicate exactly.
    pub fn is_visible(&self, now: Timestamp) -> bool {
        is_visible(self.state.deleted_at(), self.expires_at, now)
    }

    /// Still active but past its expiry, i.e. due for the sweeper.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.state.is_active() && !self.is_visible(now)
    }
}

/// Visibility predicate on raw column values.
pub fn is_visible(
    deleted_at: Option<Timestamp>,
    expires_at: Option<Timestamp>,
    now: Timestamp,
) -> bool {
    deleted_at.is_none() && expires_at.map_or(true, |at| at > now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(expires_at: Option<Timestamp>, state: RowState) -> Share {
        Share {
            id: ShareId::random(),
            resource_id: ResourceId::random(),
            group_id: GroupId::random(),
            granted_by: UserId::random(),
            expires_at,
            version: 1,
            created_at: 100,
            updated_at: 100,
            state,
        }
    }

    #[test]
    fn test_visibility_predicate() {
        let now = 1_000;
        assert!(share(None, RowState::Active).is_visible(now));
        assert!(share(Some(now + 1), RowState::Active).is_visible(now));
        // Expiry is exclusive: a share expiring right now is already gone.
        assert!(!share(Some(now), RowState::Active).is_visible(now));
        assert!(!share(Some(now - 1), RowState::Active).is_visible(now));
        assert!(!share(None, RowState::Deleted { at: 10 }).is_visible(now));
    }

    #[test]
    fn test_expired_requires_active_row() {
        let now = 1_000;
        assert!(share(Some(now - 1), RowState::Active).is_expired(now));
        assert!(!share(Some(now - 1), RowState::Deleted { at: 10 }).is_expired(now));
        assert!(!share(None, RowState::Active).is_expired(now));
    }

    #[test]
    fn test_principal_parts() {
        let group = GroupId::random();
        let principal = Principal::Group(group);
        assert_eq!(principal.kind(), PrincipalKind::Group);
        assert_eq!(principal.id(), group.0);
        assert!(Principal::User(UserId::nil()).is_nil());
    }
}
