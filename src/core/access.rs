//! Tiered access resolution for tables.
//!
//! Every table carries a visibility tier and a tagged owner identity.
//! [`resolve_access`] turns (visibility, owner, requester, admin role)
//! into an effective [`AccessLevel`]:
//!
//! | Visibility | Unauthenticated | Authenticated non-owner | Owner | Admin |
//! |------------|-----------------|-------------------------|-------|-------|
//! | private    | none            | none                    | admin | admin |
//! | public     | read            | read                    | admin | admin |
//! | shared     | read            | write                   | admin | admin |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag distinguishing a human user from an API-token actor.
///
/// Stored as a plain VARCHAR discriminator next to the identity UUID;
/// ownership is never encoded into a prefixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    User,
    ApiToken,
}

/// Identity of an actor that can own tables and author rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OwnerIdentity {
    User(Uuid),
    ApiToken(Uuid),
}

impl OwnerIdentity {
    pub fn new(kind: IdentityKind, id: Uuid) -> Self {
        match kind {
            IdentityKind::User => OwnerIdentity::User(id),
            IdentityKind::ApiToken => OwnerIdentity::ApiToken(id),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            OwnerIdentity::User(_) => IdentityKind::User,
            OwnerIdentity::ApiToken(_) => IdentityKind::ApiToken,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            OwnerIdentity::User(id) | OwnerIdentity::ApiToken(id) => *id,
        }
    }
}

/// Visibility tier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
    Shared,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Private => write!(f, "private"),
            Visibility::Public => write!(f, "public"),
            Visibility::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            "shared" => Ok(Visibility::Shared),
            _ => Err(format!("Invalid visibility: {}", s)),
        }
    }
}

/// Effective permission of a requester on one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn can_read(&self) -> bool {
        *self >= AccessLevel::Read
    }

    pub fn can_write(&self) -> bool {
        *self >= AccessLevel::Write
    }

    /// Schema changes, clearing rows and cloning require this.
    pub fn can_admin(&self) -> bool {
        *self == AccessLevel::Admin
    }
}

/// Compute the effective access level for a requester on a table.
///
/// Owner match is tagged-identity equality: a `User(x)` never matches an
/// `ApiToken(x)`. The admin role overrides everything.
pub fn resolve_access(
    visibility: Visibility,
    owner: &OwnerIdentity,
    requester: Option<&OwnerIdentity>,
    is_admin: bool,
) -> AccessLevel {
    if is_admin {
        return AccessLevel::Admin;
    }

    if let Some(requester) = requester {
        if requester == owner {
            return AccessLevel::Admin;
        }
        return match visibility {
            Visibility::Private => AccessLevel::None,
            Visibility::Public => AccessLevel::Read,
            Visibility::Shared => AccessLevel::Write,
        };
    }

    match visibility {
        Visibility::Private => AccessLevel::None,
        Visibility::Public | Visibility::Shared => AccessLevel::Read,
    }
}
