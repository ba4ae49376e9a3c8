use rusqlite::Connection;

use crate::error::{ApiError, ErrorCode};
use crate::store;

/// Membership roles, ordered by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }

    pub fn from_str(s: &str) -> Option<Role> {
        match s {
            "member" => Some(Role::Member),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }
}

fn not_member() -> ApiError {
    ApiError::new(ErrorCode::NotMember, "Not a member of this conversation")
}

fn forbidden(message: &str) -> ApiError {
    ApiError::new(ErrorCode::Forbidden, message)
}

/// Authorization gate for send/subscribe/ack and registry reads: the caller
/// must be a member of an existing conversation at the time of acceptance.
pub fn require_member(conn: &Connection, conv_id: &str, user_id: &str) -> Result<Role, ApiError> {
    if store::conv_window(conn, conv_id)
        .map_err(ApiError::storage)?
        .is_none()
    {
        return Err(ApiError::new(ErrorCode::ConvNotFound, "Unknown conversation"));
    }
    let role = store::role_of(conn, conv_id, user_id)
        .map_err(ApiError::storage)?
        .ok_or_else(not_member)?;
    Role::from_str(&role).ok_or_else(|| ApiError::new(ErrorCode::Internal, "Corrupt role"))
}

/// Invite `target` with `role`. Admins may invite members; granting the
/// admin role takes an owner.
pub fn invite(
    conn: &Connection,
    conv_id: &str,
    actor: &str,
    target: &str,
    role: Role,
) -> Result<(), ApiError> {
    let actor_role = require_member(conn, conv_id, actor)?;
    if actor_role < Role::Admin {
        return Err(forbidden("Only owners and admins may invite"));
    }
    if role == Role::Owner || (role == Role::Admin && actor_role < Role::Owner) {
        return Err(forbidden("Insufficient role to grant that role"));
    }
    if store::role_of(conn, conv_id, target)
        .map_err(ApiError::storage)?
        .is_some()
    {
        return Err(ApiError::new(ErrorCode::Conflict, "Already a member"));
    }
    store::upsert_member(conn, conv_id, target, role.as_str()).map_err(ApiError::storage)
}

/// Remove `target` from the conversation. Members may always leave on their
/// own; removing someone else takes a strictly higher rank. The last owner
/// can never be removed.
pub fn remove(
    conn: &Connection,
    conv_id: &str,
    actor: &str,
    target: &str,
) -> Result<(), ApiError> {
    let actor_role = require_member(conn, conv_id, actor)?;
    let target_role = store::role_of(conn, conv_id, target)
        .map_err(ApiError::storage)?
        .and_then(|r| Role::from_str(&r))
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "Target is not a member"))?;

    if actor != target {
        if actor_role < Role::Admin {
            return Err(forbidden("Only owners and admins may remove members"));
        }
        if actor_role <= target_role {
            return Err(forbidden("Cannot remove a member of equal or higher role"));
        }
    }
    if target_role == Role::Owner
        && store::owner_count(conn, conv_id).map_err(ApiError::storage)? <= 1
    {
        return Err(forbidden("Cannot remove the last owner"));
    }
    store::remove_member(conn, conv_id, target).map_err(ApiError::storage)?;
    Ok(())
}

/// Raise `target` one rank: member → admin (admin+), admin → owner (owner only).
pub fn promote(
    conn: &Connection,
    conv_id: &str,
    actor: &str,
    target: &str,
) -> Result<Role, ApiError> {
    let actor_role = require_member(conn, conv_id, actor)?;
    let target_role = store::role_of(conn, conv_id, target)
        .map_err(ApiError::storage)?
        .and_then(|r| Role::from_str(&r))
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "Target is not a member"))?;

    let new_role = match target_role {
        Role::Member => Role::Admin,
        Role::Admin => Role::Owner,
        Role::Owner => return Err(ApiError::new(ErrorCode::Conflict, "Already an owner")),
    };
    let required = if new_role == Role::Owner { Role::Owner } else { Role::Admin };
    if actor_role < required {
        return Err(forbidden("Insufficient role to promote"));
    }
    store::upsert_member(conn, conv_id, target, new_role.as_str()).map_err(ApiError::storage)?;
    Ok(new_role)
}

/// Lower `target` one rank: owner → admin, admin → member. Owners only;
/// the last owner cannot be demoted.
pub fn demote(
    conn: &Connection,
    conv_id: &str,
    actor: &str,
    target: &str,
) -> Result<Role, ApiError> {
    let actor_role = require_member(conn, conv_id, actor)?;
    if actor_role < Role::Owner {
        return Err(forbidden("Only owners may demote"));
    }
    let target_role = store::role_of(conn, conv_id, target)
        .map_err(ApiError::storage)?
        .and_then(|r| Role::from_str(&r))
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "Target is not a member"))?;

    let new_role = match target_role {
        Role::Owner => {
            if store::owner_count(conn, conv_id).map_err(ApiError::storage)? <= 1 {
                return Err(forbidden("Cannot demote the last owner"));
            }
            Role::Admin
        }
        Role::Admin => Role::Member,
        Role::Member => return Err(ApiError::new(ErrorCode::Conflict, "Already a member")),
    };
    store::upsert_member(conn, conv_id, target, new_role.as_str()).map_err(ApiError::storage)?;
    Ok(new_role)
}
