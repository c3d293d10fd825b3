//! Membership registry.
//!
//! Owns the (user, circle) relation: creating circles with their founding
//! admin, redeeming join codes, and listing members in rotation order.
//! Callers run these methods inside a storage transaction so each
//! operation commits all of its rows or none.

use log::{debug, error, info, warn};
use rusqlite::Connection;

use super::error::{CircleError, Result};
use super::join_code::{JoinCode, JoinCodeSource};
use super::storage::{self, CircleStorage};
use super::types::{CircleCreation, CircleId, CircleStatus, Membership, NewCircle, Role, UserId};
use crate::config::LedgerConfig;

/// Longest accepted circle name, in characters.
pub const MAX_CIRCLE_NAME_LEN: usize = 80;

/// Registry view over one storage transaction.
pub struct MembershipRegistry<'a> {
    conn: &'a Connection,
    config: &'a LedgerConfig,
}

impl<'a> MembershipRegistry<'a> {
    /// Creates a registry over `conn`.
    #[must_use]
    pub const fn new(conn: &'a Connection, config: &'a LedgerConfig) -> Self {
        Self { conn, config }
    }

    /// Creates a circle in `Forming` status with `founder` as its admin,
    /// under the join code `join_code`.
    ///
    /// # Errors
    ///
    /// - [`CircleError::InvalidInput`] for a blank name, a non-positive
    ///   amount, or an amount whose full pot would overflow
    /// - [`CircleError::UserNotFound`] / [`CircleError::UserDisabled`]
    /// - [`CircleError::JoinCodeTaken`] if another circle holds the code
    pub fn create_circle(
        &self,
        founder: UserId,
        params: &NewCircle,
        join_code: &JoinCode,
        now: i64,
    ) -> Result<CircleCreation> {
        let name = validate_name(&params.name)?;
        validate_amount(params.contribution_amount, self.config.max_members)?;
        storage::require_active_user(self.conn, founder)?;

        if storage::join_code_exists(self.conn, join_code)? {
            return Err(CircleError::JoinCodeTaken(join_code.clone()));
        }
        let circle = storage::insert_circle(
            self.conn,
            name,
            params.contribution_amount,
            params.frequency,
            join_code,
            founder,
            now,
        )?;

        let founder_membership = Membership {
            circle_id: circle.id,
            user_id: founder,
            join_order: 0,
            has_been_paid: false,
            role: Role::Admin,
            joined_at: now,
        };
        storage::insert_membership(self.conn, &founder_membership)?;

        info!(
            "circle {} created by user {founder} (amount={}, frequency={})",
            circle.id,
            circle.contribution_amount,
            circle.frequency.as_str()
        );

        Ok(CircleCreation {
            circle,
            join_code: join_code.clone(),
            founder: founder_membership,
        })
    }

    /// Adds `user` to the circle identified by `code`.
    ///
    /// The new member takes the next join order index.
    ///
    /// # Errors
    ///
    /// - [`CircleError::CircleNotFound`] if no circle has this code
    /// - [`CircleError::AlreadyMember`] if the user is already in the circle
    /// - [`CircleError::CircleNotJoinable`] unless the circle is forming
    /// - [`CircleError::CircleFull`] at the member cap
    pub fn join_circle(&self, user: UserId, code: &JoinCode, now: i64) -> Result<Membership> {
        storage::require_active_user(self.conn, user)?;

        let circle = storage::get_circle_by_code(self.conn, code)?
            .ok_or_else(|| CircleError::CircleNotFound(code.to_string()))?;

        if storage::get_membership(self.conn, circle.id, user)?.is_some() {
            return Err(CircleError::AlreadyMember {
                user,
                circle: circle.id,
            });
        }
        if circle.status != CircleStatus::Forming {
            return Err(CircleError::CircleNotJoinable(circle.id));
        }

        let members = self.list_members(circle.id)?;
        if members.len() >= self.config.max_members {
            return Err(CircleError::CircleFull {
                circle: circle.id,
                max: self.config.max_members,
            });
        }
        if pot_size(circle.contribution_amount, members.len() + 1).is_none() {
            warn!(
                "circle {}: pot of {} members would overflow, refusing join",
                circle.id,
                members.len() + 1
            );
            return Err(CircleError::CircleFull {
                circle: circle.id,
                max: members.len(),
            });
        }

        let join_order = u32::try_from(members.len()).map_err(|_| {
            CircleError::InvariantViolation(format!("circle {} has too many members", circle.id))
        })?;
        let membership = Membership {
            circle_id: circle.id,
            user_id: user,
            join_order,
            has_been_paid: false,
            role: Role::Member,
            joined_at: now,
        };
        storage::insert_membership(self.conn, &membership)?;

        info!(
            "user {user} joined circle {} at position {join_order}",
            circle.id
        );
        Ok(membership)
    }

    /// Members of a circle in join order.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvariantViolation`] if join orders are not
    /// exactly `0..N-1` or the circle does not have exactly one admin.
    pub fn list_members(&self, circle: CircleId) -> Result<Vec<Membership>> {
        let members = storage::memberships(self.conn, circle)?;
        verify_roster(circle, &members)?;
        Ok(members)
    }

    /// The membership of `user` in `circle`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotAMember`] if there is none.
    pub fn membership(&self, circle: CircleId, user: UserId) -> Result<Membership> {
        storage::get_membership(self.conn, circle, user)?
            .ok_or(CircleError::NotAMember { user, circle })
    }

    /// Fails unless `user` is the circle's admin.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotAMember`] or [`CircleError::NotCircleAdmin`].
    pub fn require_admin(&self, circle: CircleId, user: UserId) -> Result<Membership> {
        let membership = self.membership(circle, user)?;
        if membership.role != Role::Admin {
            return Err(CircleError::NotCircleAdmin { user, circle });
        }
        Ok(membership)
    }
}

/// Creates a circle, drawing join codes from `codes` until one is free.
///
/// Each draw happens outside any transaction, then a short write
/// transaction claims the code. A slow code source therefore never holds
/// the database write lock.
///
/// # Errors
///
/// - [`CircleError::CodeExhausted`] if every draw collided
/// - see [`MembershipRegistry::create_circle`]
pub fn issue_circle(
    storage: &CircleStorage,
    config: &LedgerConfig,
    founder: UserId,
    params: &NewCircle,
    codes: &dyn JoinCodeSource,
    now: i64,
) -> Result<CircleCreation> {
    let attempts = config.join_code_attempts;
    for attempt in 1..=attempts {
        let candidate = codes.next_code();
        let created = storage.write(|tx| {
            MembershipRegistry::new(tx, config).create_circle(founder, params, &candidate, now)
        });
        match created {
            Err(CircleError::JoinCodeTaken(_)) => {
                debug!("join code collision on attempt {attempt}/{attempts}");
            }
            other => return other,
        }
    }
    error!("join code space exhausted after {attempts} attempts");
    Err(CircleError::CodeExhausted(attempts))
}

/// Full pot for `members` contributions of `amount`, if it fits in `i64`.
fn pot_size(amount: i64, members: usize) -> Option<i64> {
    i64::try_from(members)
        .ok()
        .and_then(|n| amount.checked_mul(n))
}

fn validate_amount(amount: i64, max_members: usize) -> Result<()> {
    if amount <= 0 {
        return Err(CircleError::InvalidInput(format!(
            "contribution amount must be positive, got {amount}"
        )));
    }
    if pot_size(amount, max_members).is_none() {
        return Err(CircleError::InvalidInput(format!(
            "contribution amount {amount} is too large for a circle of {max_members} members"
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CircleError::InvalidInput(
            "circle name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_CIRCLE_NAME_LEN {
        return Err(CircleError::InvalidInput(format!(
            "circle name must be at most {MAX_CIRCLE_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

/// Checks join orders form `0..N-1` and there is exactly one admin.
fn verify_roster(circle: CircleId, members: &[Membership]) -> Result<()> {
    for (expected, member) in (0_u32..).zip(members) {
        if member.join_order != expected {
            error!(
                "circle {circle}: join order gap, expected {expected} found {}",
                member.join_order
            );
            return Err(CircleError::InvariantViolation(format!(
                "circle {circle} join order {} found where {expected} expected",
                member.join_order
            )));
        }
    }

    let admins = members.iter().filter(|m| m.role == Role::Admin).count();
    if !members.is_empty() && admins != 1 {
        error!("circle {circle}: {admins} admins");
        return Err(CircleError::InvariantViolation(format!(
            "circle {circle} has {admins} admins"
        )));
    }
    Ok(())
}
