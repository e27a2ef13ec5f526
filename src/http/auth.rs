//! Bearer-token authentication boundary. Token validation itself is an
//! external concern; here a token resolves to a typed principal via the
//! `auth_tokens` table.

use axum::http::HeaderMap;
use rusqlite::{Connection, OptionalExtension};

use crate::http::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub role: Role,
    pub user_id: String,
    pub enrollment_id: Option<String>,
    pub classroom_id: Option<String>,
}

pub fn authenticate(conn: &Connection, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let row: Option<(String, String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT role, user_id, enrollment_id, classroom_id FROM auth_tokens WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((role, user_id, enrollment_id, classroom_id)) = row else {
        return Err(ApiError::unauthorized("invalid bearer token"));
    };
    let Some(role) = Role::parse(&role) else {
        return Err(ApiError::unauthorized("invalid bearer token"));
    };
    Ok(Principal {
        role,
        user_id,
        enrollment_id,
        classroom_id,
    })
}

pub fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.role != Role::Admin {
        return Err(ApiError::forbidden("admin access required"));
    }
    Ok(())
}

pub fn require_staff(principal: &Principal) -> Result<(), ApiError> {
    if principal.role == Role::Student {
        return Err(ApiError::forbidden("staff access required"));
    }
    Ok(())
}

/// Admins see every classroom; teachers only the one they are assigned
/// to; students are rejected outright.
pub fn require_classroom_access(principal: &Principal, classroom_id: &str) -> Result<(), ApiError> {
    match principal.role {
        Role::Admin => Ok(()),
        Role::Teacher => {
            if principal.classroom_id.as_deref() == Some(classroom_id) {
                Ok(())
            } else {
                Err(ApiError::forbidden("not assigned to this classroom"))
            }
        }
        Role::Student => Err(ApiError::forbidden("staff access required")),
    }
}
