//! Contribution ledger.
//!
//! Append-only record of who paid into which cycle, and when. A record is
//! never updated or deleted once written.

use log::warn;
use rusqlite::Connection;

use super::error::{CircleError, Result};
use super::storage;
use super::types::{CircleId, CircleStatus, ContributionRecord, UserId};

/// A member's punctuality within one circle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentHistory {
    /// Contributions made by the deadline.
    pub on_time: u32,
    /// Contributions made after the deadline.
    pub late: u32,
}

impl PaymentHistory {
    /// Share of contributions that were on time. `None` with no history.
    #[must_use]
    pub fn on_time_ratio(&self) -> Option<f64> {
        let total = self.on_time + self.late;
        (total > 0).then(|| f64::from(self.on_time) / f64::from(total))
    }
}

/// Ledger view over one storage transaction.
pub struct ContributionLedger<'a> {
    conn: &'a Connection,
}

impl<'a> ContributionLedger<'a> {
    /// Creates a ledger over `conn`.
    #[must_use]
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Records `user`'s contribution to `cycle` of a circle.
    ///
    /// The record is on time if `timestamp` is no later than the cycle
    /// deadline. The user's lifetime savings grow by `amount`.
    ///
    /// # Errors
    ///
    /// - [`CircleError::NotAMember`] if the user is not in the circle
    /// - [`CircleError::CircleNotActive`] unless the circle is active
    /// - [`CircleError::CycleClosed`] if `cycle` is not the current cycle
    /// - [`CircleError::DuplicateContribution`] if the user already paid this cycle
    /// - [`CircleError::AmountMismatch`] if `amount` differs from the circle's amount
    pub fn record_contribution(
        &self,
        circle_id: CircleId,
        cycle: u32,
        user: UserId,
        amount: i64,
        timestamp: i64,
    ) -> Result<ContributionRecord> {
        let circle = storage::require_circle(self.conn, circle_id)?;
        storage::require_active_user(self.conn, user)?;
        if storage::get_membership(self.conn, circle_id, user)?.is_none() {
            return Err(CircleError::NotAMember {
                user,
                circle: circle_id,
            });
        }

        if circle.status != CircleStatus::Active {
            return Err(CircleError::CircleNotActive(circle_id));
        }
        if cycle != circle.current_cycle {
            warn!(
                "circle {circle_id} cycle {cycle}: contribution from user {user} \
                 rejected, current cycle is {}",
                circle.current_cycle
            );
            return Err(CircleError::CycleClosed {
                circle: circle_id,
                requested: cycle,
                current: circle.current_cycle,
            });
        }
        if storage::get_contribution(self.conn, circle_id, cycle, user)?.is_some() {
            return Err(CircleError::DuplicateContribution {
                circle: circle_id,
                cycle,
                user,
            });
        }
        if amount != circle.contribution_amount {
            return Err(CircleError::AmountMismatch {
                expected: circle.contribution_amount,
                actual: amount,
            });
        }

        let deadline = circle.current_deadline().ok_or_else(|| {
            CircleError::InvariantViolation(format!(
                "active circle {circle_id} has no cycle start"
            ))
        })?;

        let record = ContributionRecord {
            circle_id,
            cycle,
            user_id: user,
            amount,
            paid_at: timestamp,
            on_time: timestamp <= deadline,
        };
        storage::insert_contribution(self.conn, &record)?;
        storage::add_to_total_saved(self.conn, user, amount)?;

        Ok(record)
    }

    /// Sum of the amounts recorded for a cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn cycle_total(&self, circle: CircleId, cycle: u32) -> Result<i64> {
        let records = storage::contributions_for_cycle(self.conn, circle, cycle)?;
        records.iter().try_fold(0_i64, |total, record| {
            total.checked_add(record.amount).ok_or_else(|| {
                CircleError::InvariantViolation(format!(
                    "circle {circle} cycle {cycle} total overflows"
                ))
            })
        })
    }

    /// Whether every current member has a record for `cycle`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn is_cycle_complete(&self, circle: CircleId, cycle: u32) -> Result<bool> {
        let members = storage::memberships(self.conn, circle)?;
        if members.is_empty() {
            return Ok(false);
        }
        let records = storage::contributions_for_cycle(self.conn, circle, cycle)?;
        Ok(members
            .iter()
            .all(|m| records.iter().any(|r| r.user_id == m.user_id)))
    }

    /// The record for one (circle, cycle, user), if written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_contribution(
        &self,
        circle: CircleId,
        cycle: u32,
        user: UserId,
    ) -> Result<Option<ContributionRecord>> {
        storage::get_contribution(self.conn, circle, cycle, user)
    }

    /// Every record of a cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn contributions_for_cycle(
        &self,
        circle: CircleId,
        cycle: u32,
    ) -> Result<Vec<ContributionRecord>> {
        storage::contributions_for_cycle(self.conn, circle, cycle)
    }

    /// On-time and late counts for a member across all cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn member_history(&self, circle: CircleId, user: UserId) -> Result<PaymentHistory> {
        let records = storage::contributions_for_member(self.conn, circle, user)?;
        Ok(records
            .iter()
            .fold(PaymentHistory::default(), |mut history, record| {
                if record.on_time {
                    history.on_time += 1;
                } else {
                    history.late += 1;
                }
                history
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circle::join_code::JoinCode;
    use crate::circle::storage::CircleStorage;
    use crate::circle::types::{Circle, Frequency, Membership, Role};

    const START: i64 = 1_700_000_000;
    const WEEK: i64 = 7 * 86_400;

    /// Active weekly circle of `members` users paying 1000, started at `START`.
    fn active_circle(members: u8) -> (CircleStorage, Circle, Vec<UserId>) {
        let storage = CircleStorage::in_memory().unwrap();
        let (circle, users) = storage
            .write(|tx| {
                let users = (0..members)
                    .map(|i| {
                        storage::insert_user(tx, &format!("U{i}"), &format!("u{i}@x.io"), 0)
                            .map(|u| u.id)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut circle = storage::insert_circle(
                    tx,
                    "Weekly",
                    1_000,
                    Frequency::Weekly,
                    &JoinCode::parse("WEEK01").unwrap(),
                    users[0],
                    0,
                )?;
                for (order, user) in (0_u32..).zip(&users) {
                    storage::insert_membership(
                        tx,
                        &Membership {
                            circle_id: circle.id,
                            user_id: *user,
                            join_order: order,
                            has_been_paid: false,
                            role: if order == 0 { Role::Admin } else { Role::Member },
                            joined_at: 0,
                        },
                    )?;
                }
                circle.status = CircleStatus::Active;
                circle.cycle_started_at = Some(START);
                storage::update_circle_progress(tx, &circle, START)?;
                Ok((circle, users))
            })
            .unwrap();
        (storage, circle, users)
    }

    fn record(
        storage: &CircleStorage,
        circle: CircleId,
        cycle: u32,
        user: UserId,
        amount: i64,
        at: i64,
    ) -> Result<ContributionRecord> {
        storage.write(|tx| {
            ContributionLedger::new(tx).record_contribution(circle, cycle, user, amount, at)
        })
    }

    #[test]
    fn record_sets_on_time_flag_from_deadline() {
        let (storage, circle, users) = active_circle(3);

        let early = record(&storage, circle.id, 0, users[0], 1_000, START + 10).unwrap();
        assert!(early.on_time);

        let at_deadline = record(&storage, circle.id, 0, users[1], 1_000, START + WEEK).unwrap();
        assert!(at_deadline.on_time);

        let late = record(&storage, circle.id, 0, users[2], 1_000, START + WEEK + 1).unwrap();
        assert!(!late.on_time);
    }

    #[test]
    fn record_updates_total_saved() {
        let (storage, circle, users) = active_circle(2);
        record(&storage, circle.id, 0, users[1], 1_000, START).unwrap();

        let user = storage
            .read(|conn| storage::get_user(conn, users[1]))
            .unwrap()
            .unwrap();
        assert_eq!(user.total_saved, 1_000);
    }

    #[test]
    fn duplicate_contribution_leaves_ledger_unchanged() {
        let (storage, circle, users) = active_circle(2);
        record(&storage, circle.id, 0, users[0], 1_000, START).unwrap();

        let second = record(&storage, circle.id, 0, users[0], 1_000, START + 5);
        assert!(matches!(
            second,
            Err(CircleError::DuplicateContribution { cycle: 0, .. })
        ));

        storage
            .read(|conn| {
                let ledger = ContributionLedger::new(conn);
                assert_eq!(ledger.contributions_for_cycle(circle.id, 0)?.len(), 1);
                assert_eq!(ledger.cycle_total(circle.id, 0)?, 1_000);
                assert_eq!(storage::get_user(conn, users[0])?.unwrap().total_saved, 1_000);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn wrong_amount_is_rejected() {
        let (storage, circle, users) = active_circle(2);
        let result = record(&storage, circle.id, 0, users[0], 999, START);
        assert!(matches!(
            result,
            Err(CircleError::AmountMismatch {
                expected: 1_000,
                actual: 999
            })
        ));
    }

    #[test]
    fn other_cycles_are_closed() {
        let (storage, circle, users) = active_circle(2);
        let result = record(&storage, circle.id, 1, users[0], 1_000, START);
        assert!(matches!(
            result,
            Err(CircleError::CycleClosed {
                requested: 1,
                current: 0,
                ..
            })
        ));
    }

    #[test]
    fn non_member_is_rejected() {
        let (storage, circle, _) = active_circle(2);
        let outsider = storage
            .write(|tx| storage::insert_user(tx, "Out", "out@x.io", 0))
            .unwrap();
        let result = record(&storage, circle.id, 0, outsider.id, 1_000, START);
        assert!(matches!(result, Err(CircleError::NotAMember { .. })));
    }

    #[test]
    fn forming_circle_rejects_contributions() {
        let (storage, mut circle, users) = active_circle(2);
        circle.status = CircleStatus::Forming;
        storage
            .write(|tx| storage::update_circle_progress(tx, &circle, 0))
            .unwrap();
        let result = record(&storage, circle.id, 0, users[0], 1_000, START);
        assert!(matches!(result, Err(CircleError::CircleNotActive(_))));
    }

    #[test]
    fn cycle_completes_when_every_member_paid() {
        let (storage, circle, users) = active_circle(3);
        let complete = |storage: &CircleStorage| {
            storage
                .read(|conn| ContributionLedger::new(conn).is_cycle_complete(circle.id, 0))
                .unwrap()
        };

        record(&storage, circle.id, 0, users[0], 1_000, START).unwrap();
        record(&storage, circle.id, 0, users[1], 1_000, START).unwrap();
        assert!(!complete(&storage));

        record(&storage, circle.id, 0, users[2], 1_000, START).unwrap();
        assert!(complete(&storage));
        assert_eq!(
            storage
                .read(|conn| ContributionLedger::new(conn).cycle_total(circle.id, 0))
                .unwrap(),
            3_000
        );
    }

    #[test]
    fn member_history_counts_punctuality() {
        let (storage, mut circle, users) = active_circle(2);
        record(&storage, circle.id, 0, users[0], 1_000, START).unwrap();

        circle.current_cycle = 1;
        circle.cycle_started_at = Some(START + WEEK);
        storage
            .write(|tx| storage::update_circle_progress(tx, &circle, START + WEEK))
            .unwrap();
        record(&storage, circle.id, 1, users[0], 1_000, START + 3 * WEEK).unwrap();

        let history = storage
            .read(|conn| ContributionLedger::new(conn).member_history(circle.id, users[0]))
            .unwrap();
        assert_eq!(history, PaymentHistory { on_time: 1, late: 1 });
        assert_eq!(history.on_time_ratio(), Some(0.5));

        let empty = storage
            .read(|conn| ContributionLedger::new(conn).member_history(circle.id, users[1]))
            .unwrap();
        assert_eq!(empty.on_time_ratio(), None);
    }
}
