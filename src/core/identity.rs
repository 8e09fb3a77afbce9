//! Requester identity extracted from gateway headers.
//!
//! Authentication happens upstream; the gateway forwards who the caller
//! is via `x-user-id` or `x-api-token-id`, and `x-admin-role: admin`
//! when the user holds the admin role. Anonymous requests carry neither
//! identity header.

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::core::access::OwnerIdentity;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const API_TOKEN_ID_HEADER: &str = "x-api-token-id";
pub const ADMIN_ROLE_HEADER: &str = "x-admin-role";

/// The authenticated caller of a request, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub identity: Option<OwnerIdentity>,
    pub is_admin: bool,
}

impl Requester {
    pub const ANONYMOUS: Requester = Requester {
        identity: None,
        is_admin: false,
    };

    /// Parse the identity headers. A malformed or missing id header
    /// yields an anonymous requester rather than an error; admin status
    /// only applies to authenticated users.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let identity = parse_uuid_header(headers, USER_ID_HEADER)
            .map(OwnerIdentity::User)
            .or_else(|| parse_uuid_header(headers, API_TOKEN_ID_HEADER).map(OwnerIdentity::ApiToken));

        let is_admin = identity.is_some()
            && headers
                .get(ADMIN_ROLE_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("admin"));

        Self { identity, is_admin }
    }
}

fn parse_uuid_header(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
}
