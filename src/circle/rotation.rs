//! Rotation scheduler.
//!
//! Decides who collects each cycle's pot and closes cycles. The payee is
//! always the unpaid member with the lowest join order, so every member is
//! paid exactly once over a full rotation.

use log::{error, info, warn};
use rusqlite::Connection;

use super::error::{CircleError, Result};
use super::ledger::ContributionLedger;
use super::registry::MembershipRegistry;
use super::storage;
use super::trust;
use super::types::{
    Circle, CircleId, CircleStatus, CycleSettlement, Membership, PayoutRecord, TrustUpdate,
};
use crate::config::LedgerConfig;

/// Fewest members a circle needs before it can start.
pub const MIN_MEMBERS_TO_START: usize = 2;

/// Scheduler view over one storage transaction.
pub struct RotationScheduler<'a> {
    conn: &'a Connection,
    config: &'a LedgerConfig,
}

impl<'a> RotationScheduler<'a> {
    /// Creates a scheduler over `conn`.
    #[must_use]
    pub const fn new(conn: &'a Connection, config: &'a LedgerConfig) -> Self {
        Self { conn, config }
    }

    /// The member due to collect the current cycle's pot.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NoEligibleMember`] once every member has been
    /// paid.
    pub fn next_payee(&self, circle: CircleId) -> Result<Membership> {
        let members = MembershipRegistry::new(self.conn, self.config).list_members(circle)?;
        first_unpaid(circle, &members).cloned()
    }

    /// Moves a forming circle into its first cycle, starting at `now`.
    ///
    /// # Errors
    ///
    /// - [`CircleError::CircleNotJoinable`] unless the circle is forming
    /// - [`CircleError::NotEnoughMembers`] below two members
    pub fn start(&self, circle_id: CircleId, now: i64) -> Result<Circle> {
        let mut circle = storage::require_circle(self.conn, circle_id)?;
        if circle.status != CircleStatus::Forming {
            return Err(CircleError::CircleNotJoinable(circle_id));
        }

        let count = storage::member_count(self.conn, circle_id)?;
        if count < MIN_MEMBERS_TO_START {
            return Err(CircleError::NotEnoughMembers {
                circle: circle_id,
                count,
            });
        }

        circle.status = CircleStatus::Active;
        circle.cycle_started_at = Some(now);
        circle.updated_at = now;
        storage::update_circle_progress(self.conn, &circle, now)?;

        info!("circle {circle_id} started with {count} members");
        Ok(circle)
    }

    /// Closes the current cycle.
    ///
    /// Pays the pot to the next payee, applies every member's trust score
    /// change for the closed cycle, then opens the next cycle one period
    /// after the previous one started. The circle completes once all
    /// members have been paid.
    ///
    /// # Errors
    ///
    /// - [`CircleError::CircleNotActive`] unless the circle is active
    /// - [`CircleError::CycleIncomplete`] if any member has not contributed
    /// - [`CircleError::InvariantViolation`] if the pot does not match
    ///   amount × members or a payout already exists for the cycle
    /// - [`CircleError::NoEligibleMember`] if every member was already paid
    pub fn advance_cycle(&self, circle_id: CircleId, now: i64) -> Result<CycleSettlement> {
        let mut circle = storage::require_circle(self.conn, circle_id)?;
        if circle.status != CircleStatus::Active {
            return Err(CircleError::CircleNotActive(circle_id));
        }
        let cycle = circle.current_cycle;

        let ledger = ContributionLedger::new(self.conn);
        if !ledger.is_cycle_complete(circle_id, cycle)? {
            warn!("circle {circle_id} cycle {cycle}: advance requested before all members paid");
            return Err(CircleError::CycleIncomplete {
                circle: circle_id,
                cycle,
            });
        }

        let members = MembershipRegistry::new(self.conn, self.config).list_members(circle_id)?;
        let total = ledger.cycle_total(circle_id, cycle)?;
        let expected = i64::try_from(members.len())
            .ok()
            .and_then(|n| circle.contribution_amount.checked_mul(n))
            .ok_or_else(|| {
                CircleError::InvariantViolation(format!(
                    "circle {circle_id} cycle {cycle}: pot size overflows"
                ))
            })?;
        if total != expected {
            error!("circle {circle_id} cycle {cycle}: pot {total} but expected {expected}");
            return Err(CircleError::InvariantViolation(format!(
                "circle {circle_id} cycle {cycle} pot is {total}, expected {expected}"
            )));
        }
        if storage::get_payout(self.conn, circle_id, cycle)?.is_some() {
            error!("circle {circle_id} cycle {cycle}: payout already recorded for open cycle");
            return Err(CircleError::InvariantViolation(format!(
                "circle {circle_id} cycle {cycle} already has a payout"
            )));
        }

        let payee = first_unpaid(circle_id, &members)?;
        let payout = PayoutRecord {
            circle_id,
            cycle,
            recipient: payee.user_id,
            amount: total,
            paid_at: now,
        };
        storage::insert_payout(self.conn, &payout)?;
        storage::mark_paid(self.conn, circle_id, payee.user_id)?;

        let trust_updates = self.apply_trust(&ledger, &members, circle_id, cycle)?;

        let next_start = circle.current_deadline().ok_or_else(|| {
            CircleError::InvariantViolation(format!(
                "circle {circle_id} cycle {cycle}: no deadline for active cycle"
            ))
        })?;
        circle.current_cycle = cycle.checked_add(1).ok_or_else(|| {
            CircleError::InvariantViolation(format!("circle {circle_id} cycle counter overflows"))
        })?;
        circle.cycle_started_at = Some(next_start);
        circle.updated_at = now;

        let all_paid = members
            .iter()
            .all(|m| m.has_been_paid || m.user_id == payee.user_id);
        circle.status = if all_paid {
            CircleStatus::Completed
        } else {
            CircleStatus::Active
        };
        storage::update_circle_progress(self.conn, &circle, now)?;

        info!(
            "circle {circle_id} cycle {cycle}: paid {} to user {}",
            payout.amount, payout.recipient
        );
        if all_paid {
            info!("circle {circle_id} completed after {} cycles", cycle + 1);
        }

        Ok(CycleSettlement {
            circle,
            payout,
            trust_updates,
        })
    }

    /// Scores each member on their record for the closed cycle.
    fn apply_trust(
        &self,
        ledger: &ContributionLedger<'_>,
        members: &[Membership],
        circle: CircleId,
        cycle: u32,
    ) -> Result<Vec<TrustUpdate>> {
        let records = ledger.contributions_for_cycle(circle, cycle)?;
        members
            .iter()
            .map(|member| {
                let user = storage::get_user(self.conn, member.user_id)?
                    .ok_or(CircleError::UserNotFound(member.user_id))?;
                let (on_time, late, missed) =
                    match records.iter().find(|r| r.user_id == member.user_id) {
                        Some(record) if record.on_time => (1, 0, 0),
                        Some(_) => (0, 1, 0),
                        None => (0, 0, 1),
                    };
                let current = trust::update_score(user.trust_score, on_time, late, missed);
                storage::set_trust_score(self.conn, user.id, current)?;
                Ok(TrustUpdate {
                    user_id: user.id,
                    previous: user.trust_score,
                    current,
                })
            })
            .collect()
    }
}

fn first_unpaid(circle: CircleId, members: &[Membership]) -> Result<&Membership> {
    members
        .iter()
        .find(|m| !m.has_been_paid)
        .ok_or(CircleError::NoEligibleMember(circle))
}
