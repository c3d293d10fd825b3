//! Circle coordinator.
//!
//! The async entry point for every ledger operation. It owns the storage
//! handle, serializes mutations per circle, bounds every storage call with
//! the configured timeout, and turns ledger state into the read models the
//! transport layer serves.
//!
//! # Concurrency
//!
//! Each mutation takes the circle's writer lock, then runs its transaction
//! on a blocking thread. The lock guard moves into that thread, so if the
//! caller gives up (timeout or dropped future) the transaction still
//! commits or rolls back as a whole before the next writer gets in.
//! [`CircleCoordinator::reconcile_contribution`] uses this to tell a caller
//! whether a timed-out submission landed.
//!
//! The per-circle lock only orders writers within a circle. Across circles,
//! storage runs in WAL mode on a connection pool: reads never block, and
//! write transactions stay short, so a busy circle does not stall the rest.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction};

use super::error::{CircleError, ErrorKind, Result};
use super::join_code::{JoinCode, JoinCodeSource, RandomJoinCodes};
use super::ledger::ContributionLedger;
use super::locks::{CircleGuard, CircleLocks};
use super::registry::{self, MembershipRegistry};
use super::rotation::RotationScheduler;
use super::storage::{self, CircleStorage};
use super::types::{
    Circle, CircleCreation, CircleId, CircleOverview, CircleStatus, CircleSummary,
    ContributionReceipt, ContributionRecord, CycleSettlement, MemberStanding, Membership,
    NewCircle, PayeeSummary, User, UserDashboard, UserId, VerifiedUser,
};
use crate::config::LedgerConfig;

/// File name of the ledger database inside the data directory.
pub const DB_FILE_NAME: &str = "padisave.db";

/// Longest accepted display name, in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 80;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Creates a clock reading `timestamp` (Unix seconds).
    #[must_use]
    pub const fn new(timestamp: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(timestamp),
        }
    }

    /// Sets the current time.
    pub fn set(&self, timestamp: i64) {
        self.now
            .store(timestamp, std::sync::atomic::Ordering::SeqCst);
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: i64) {
        self.now
            .fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ts = self.now.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::from_timestamp(ts, 0).unwrap_or_default()
    }
}

/// Async facade over the circle ledger.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// use padisave_core::circle::{CircleCoordinator, NewCircle, VerifiedUser};
/// use padisave_core::LedgerConfig;
///
/// # #[tokio::main]
/// # async fn main() -> padisave_core::Result<()> {
/// let coordinator =
///     CircleCoordinator::open(Path::new("/var/lib/padisave"), LedgerConfig::from_env())?;
/// let ada = coordinator.register_user("Ada", "ada@example.com").await?;
/// let caller = VerifiedUser::new(ada.id);
/// let created = coordinator
///     .create_circle(&caller, NewCircle::new("Market women", 5_000))
///     .await?;
/// println!("share code {}", created.join_code);
/// # Ok(())
/// # }
/// ```
pub struct CircleCoordinator {
    storage: Arc<CircleStorage>,
    config: Arc<LedgerConfig>,
    locks: CircleLocks,
    clock: Arc<dyn Clock>,
    codes: Arc<dyn JoinCodeSource>,
}

impl CircleCoordinator {
    /// Creates a coordinator over an open storage handle.
    #[must_use]
    pub fn new(storage: CircleStorage, config: LedgerConfig) -> Self {
        Self {
            storage: Arc::new(storage),
            config: Arc::new(config),
            locks: CircleLocks::new(),
            clock: Arc::new(SystemClock),
            codes: Arc::new(RandomJoinCodes),
        }
    }

    /// Opens (or creates) the ledger database in `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(data_dir: &Path, config: LedgerConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            CircleError::Storage(format!(
                "Failed to create data directory {}: {e}",
                data_dir.display()
            ))
        })?;
        let storage = CircleStorage::new(&data_dir.join(DB_FILE_NAME), &config)?;
        info!("opened circle ledger in {}", data_dir.display());
        Ok(Self::new(storage, config))
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the join code source.
    #[must_use]
    pub fn with_join_codes(mut self, codes: Arc<dyn JoinCodeSource>) -> Self {
        self.codes = codes;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    // ==================== Users ====================

    /// Registers a new user with the default trust score.
    ///
    /// # Errors
    ///
    /// - [`CircleError::InvalidInput`] for a blank name or malformed email
    /// - [`CircleError::EmailTaken`] if the email is already registered
    pub async fn register_user(&self, display_name: &str, email: &str) -> Result<User> {
        let display_name = display_name.trim().to_string();
        let email = email.trim().to_string();
        let now = self.now();

        let result = async {
            validate_display_name(&display_name)?;
            validate_email(&email)?;
            self.run_write(None, move |tx, _| {
                if storage::get_user_by_email(tx, &email)?.is_some() {
                    return Err(CircleError::EmailTaken(email));
                }
                let user = storage::insert_user(tx, &display_name, &email, now)?;
                info!("registered user {}", user.id);
                Ok(user)
            })
            .await
        }
        .await;
        result.inspect_err(|e| log_failure("register_user", None, None, e))
    }

    /// Looks up a user.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::UserNotFound`] if there is no such user.
    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.run_read(move |conn, _| {
            storage::get_user(conn, id)?.ok_or(CircleError::UserNotFound(id))
        })
        .await
    }

    /// Soft-disables a user. Their history stays; they can no longer join
    /// or contribute.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::UserNotFound`] if there is no such user.
    pub async fn disable_user(&self, id: UserId) -> Result<()> {
        self.run_write(None, move |tx, _| {
            storage::disable_user(tx, id)?;
            info!("disabled user {id}");
            Ok(())
        })
        .await
        .inspect_err(|e| log_failure("disable_user", None, None, e))
    }

    // ==================== Circle lifecycle ====================

    /// Creates a circle with `caller` as its admin.
    ///
    /// # Errors
    ///
    /// See [`issue_circle`](crate::circle::issue_circle).
    pub async fn create_circle(
        &self,
        caller: &VerifiedUser,
        params: NewCircle,
    ) -> Result<CircleCreation> {
        let founder = caller.id();
        let codes = Arc::clone(&self.codes);
        let now = self.now();

        self.run_blocking(None, move |storage, config| {
            registry::issue_circle(storage, config, founder, &params, codes.as_ref(), now)
        })
        .await
        .inspect_err(|e| log_failure("create_circle", None, None, e))
    }

    /// Joins the circle identified by `code`.
    ///
    /// # Errors
    ///
    /// - [`CircleError::InvalidInput`] for a malformed code
    /// - see [`MembershipRegistry::join_circle`]
    pub async fn join_circle(&self, caller: &VerifiedUser, code: &str) -> Result<Membership> {
        let user = caller.id();
        let code = JoinCode::parse(code)
            .inspect_err(|e| log_failure("join_circle", None, None, e))?;

        let lookup = code.clone();
        let circle = self
            .run_read(move |conn, _| {
                storage::get_circle_by_code(conn, &lookup)?
                    .map(|c| c.id)
                    .ok_or_else(|| CircleError::CircleNotFound(lookup.to_string()))
            })
            .await
            .inspect_err(|e| log_failure("join_circle", None, None, e))?;

        let now = self.now();
        self.mutate_circle(circle, move |tx, config| {
            MembershipRegistry::new(tx, config).join_circle(user, &code, now)
        })
        .await
        .inspect_err(|e| log_failure("join_circle", Some(circle), None, e))
    }

    /// Starts the first cycle of a forming circle. Admin only.
    ///
    /// # Errors
    ///
    /// - [`CircleError::NotCircleAdmin`] unless `caller` is the admin
    /// - see [`RotationScheduler::start`]
    pub async fn start_circle(&self, caller: &VerifiedUser, circle: CircleId) -> Result<Circle> {
        let user = caller.id();
        let now = self.now();
        self.mutate_circle(circle, move |tx, config| {
            storage::require_circle(tx, circle)?;
            MembershipRegistry::new(tx, config).require_admin(circle, user)?;
            RotationScheduler::new(tx, config).start(circle, now)
        })
        .await
        .inspect_err(|e| log_failure("start_circle", Some(circle), None, e))
    }

    /// Records the caller's contribution to `cycle`, timestamped now.
    ///
    /// # Errors
    ///
    /// See [`ContributionLedger::record_contribution`]. On
    /// [`CircleError::StorageTimeout`] the record may still have been
    /// written; use [`Self::reconcile_contribution`] to find out.
    pub async fn submit_contribution(
        &self,
        caller: &VerifiedUser,
        circle: CircleId,
        cycle: u32,
        amount: i64,
    ) -> Result<ContributionReceipt> {
        let user = caller.id();
        let now = self.now();
        self.mutate_circle(circle, move |tx, _| {
            let ledger = ContributionLedger::new(tx);
            let record = ledger.record_contribution(circle, cycle, user, amount, now)?;
            let cycle_total = ledger.cycle_total(circle, cycle)?;
            let cycle_complete = ledger.is_cycle_complete(circle, cycle)?;
            debug!(
                "circle {circle} cycle {cycle}: user {user} paid {amount} (on time: {})",
                record.on_time
            );
            Ok(ContributionReceipt {
                record,
                cycle_total,
                cycle_complete,
            })
        })
        .await
        .inspect_err(|e| log_failure("submit_contribution", Some(circle), Some(cycle), e))
    }

    /// Pays out the current cycle and opens the next. Admin only.
    ///
    /// # Errors
    ///
    /// - [`CircleError::NotCircleAdmin`] unless `caller` is the admin
    /// - see [`RotationScheduler::advance_cycle`]
    pub async fn advance_cycle(
        &self,
        caller: &VerifiedUser,
        circle: CircleId,
    ) -> Result<CycleSettlement> {
        let user = caller.id();
        let now = self.now();
        self.mutate_circle(circle, move |tx, config| {
            storage::require_circle(tx, circle)?;
            MembershipRegistry::new(tx, config).require_admin(circle, user)?;
            RotationScheduler::new(tx, config).advance_cycle(circle, now)
        })
        .await
        .inspect_err(|e| log_failure("advance_cycle", Some(circle), None, e))
    }

    /// Whether `user`'s contribution to `cycle` was committed.
    ///
    /// Waits for the circle's writer lock first, so any in-flight
    /// submission has finished one way or the other.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::StorageTimeout`] if the lock or read does not
    /// complete in time.
    pub async fn reconcile_contribution(
        &self,
        circle: CircleId,
        cycle: u32,
        user: UserId,
    ) -> Result<Option<ContributionRecord>> {
        let result = async {
            self.require_circle(circle).await?;
            let _guard = self
                .locks
                .acquire(circle, self.config.storage_timeout)
                .await?;
            self.run_read(move |conn, _| {
                ContributionLedger::new(conn).find_contribution(circle, cycle, user)
            })
            .await
        }
        .await;
        result.inspect_err(|e| log_failure("reconcile_contribution", Some(circle), Some(cycle), e))
    }

    // ==================== Read models ====================

    /// Members of a circle in join order.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::CircleNotFound`] or an invariant error if the
    /// roster is corrupt.
    pub async fn list_members(&self, circle: CircleId) -> Result<Vec<Membership>> {
        self.run_read(move |conn, config| {
            storage::require_circle(conn, circle)?;
            MembershipRegistry::new(conn, config).list_members(circle)
        })
        .await
        .inspect_err(|e| log_failure("list_members", Some(circle), None, e))
    }

    /// The member due to collect the current pot.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NoEligibleMember`] once the circle is
    /// complete.
    pub async fn next_payee(&self, circle: CircleId) -> Result<PayeeSummary> {
        self.run_read(move |conn, config| {
            storage::require_circle(conn, circle)?;
            let payee = RotationScheduler::new(conn, config).next_payee(circle)?;
            payee_summary(conn, &payee)
        })
        .await
        .inspect_err(|e| log_failure("next_payee", Some(circle), None, e))
    }

    /// Progress, payee, and member standings for one circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::CircleNotFound`] if there is no such circle.
    pub async fn circle_overview(&self, circle: CircleId) -> Result<CircleOverview> {
        self.run_read(move |conn, config| build_overview(conn, config, circle))
            .await
            .inspect_err(|e| log_failure("circle_overview", Some(circle), None, e))
    }

    /// Profile and per-circle summaries for a user's home screen.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::UserNotFound`] if there is no such user.
    pub async fn user_dashboard(&self, user: UserId) -> Result<UserDashboard> {
        self.run_read(move |conn, config| build_dashboard(conn, config, user))
            .await
            .inspect_err(|e| log_failure("user_dashboard", None, None, e))
    }

    // ==================== Plumbing ====================

    /// Fails with [`CircleError::CircleNotFound`] unless `circle` exists.
    async fn require_circle(&self, circle: CircleId) -> Result<()> {
        self.run_read(move |conn, _| storage::require_circle(conn, circle).map(|_| ()))
            .await
    }

    /// Runs `f` under the circle's writer lock.
    ///
    /// Unknown circles are rejected before a lock entry is created.
    async fn mutate_circle<T, F>(&self, circle: CircleId, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>, &LedgerConfig) -> Result<T> + Send + 'static,
    {
        self.require_circle(circle).await?;
        let guard = self
            .locks
            .acquire(circle, self.config.storage_timeout)
            .await?;
        self.run_write(Some(guard), f).await
    }

    /// Runs `f` in a write transaction on a blocking thread.
    async fn run_write<T, F>(&self, guard: Option<CircleGuard>, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>, &LedgerConfig) -> Result<T> + Send + 'static,
    {
        self.run_blocking(guard, move |storage, config| {
            storage.write(|tx| f(tx, config))
        })
        .await
    }

    /// Runs `job` against storage on a blocking thread.
    ///
    /// `guard`, if any, is released only when `job` has finished, even if
    /// this future times out or is dropped first.
    async fn run_blocking<T, F>(&self, guard: Option<CircleGuard>, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CircleStorage, &LedgerConfig) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        let config = Arc::clone(&self.config);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            job(&storage, &config)
        });

        match tokio::time::timeout(self.config.storage_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CircleError::Storage(format!("Storage task failed: {e}"))),
            Err(_) => Err(CircleError::StorageTimeout),
        }
    }

    /// Runs `f` in a read transaction, retrying on storage timeouts.
    async fn run_read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Connection, &LedgerConfig) -> Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0;
        loop {
            let storage = Arc::clone(&self.storage);
            let config = Arc::clone(&self.config);
            let read = Arc::clone(&f);
            let task =
                tokio::task::spawn_blocking(move || storage.read(|conn| read(conn, &config)));

            let result = match tokio::time::timeout(self.config.storage_timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(CircleError::Storage(format!("Storage task failed: {e}"))),
                Err(_) => Err(CircleError::StorageTimeout),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    debug!(
                        "read timed out, retrying ({attempt}/{})",
                        self.config.read_retries
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

fn log_failure(op: &str, circle: Option<CircleId>, cycle: Option<u32>, err: &CircleError) {
    let circle = circle.map_or_else(|| "-".to_string(), |c| c.to_string());
    let cycle = cycle.map_or_else(|| "-".to_string(), |c| c.to_string());
    match err.kind() {
        ErrorKind::Invariant => error!("{op} failed (circle {circle}, cycle {cycle}): {err}"),
        _ => warn!("{op} failed (circle {circle}, cycle {cycle}): {err}"),
    }
}

fn validate_display_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CircleError::InvalidInput(
            "display name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(CircleError::InvalidInput(format!(
            "display name must be at most {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !well_formed || email.chars().any(char::is_whitespace) {
        return Err(CircleError::InvalidInput(format!(
            "invalid email address: {email:?}"
        )));
    }
    Ok(())
}

fn payee_summary(conn: &Connection, member: &Membership) -> Result<PayeeSummary> {
    let user = storage::get_user(conn, member.user_id)?
        .ok_or(CircleError::UserNotFound(member.user_id))?;
    Ok(PayeeSummary {
        user_id: user.id,
        display_name: user.display_name,
        join_order: member.join_order,
    })
}

/// Paid members over total members, in `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
fn progress(members: &[Membership]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let paid = members.iter().filter(|m| m.has_been_paid).count();
    paid as f64 / members.len() as f64
}

fn build_overview(conn: &Connection, config: &LedgerConfig, circle_id: CircleId) -> Result<CircleOverview> {
    let circle = storage::require_circle(conn, circle_id)?;
    let members = MembershipRegistry::new(conn, config).list_members(circle_id)?;
    let ledger = ContributionLedger::new(conn);
    let cycle = circle.current_cycle;
    let records = ledger.contributions_for_cycle(circle_id, cycle)?;

    let next_payee = match circle.status {
        CircleStatus::Completed => None,
        _ => members
            .iter()
            .find(|m| !m.has_been_paid)
            .map(|m| payee_summary(conn, m))
            .transpose()?,
    };

    let standings = members
        .iter()
        .map(|member| {
            let user = storage::get_user(conn, member.user_id)?
                .ok_or(CircleError::UserNotFound(member.user_id))?;
            let history = ledger.member_history(circle_id, member.user_id)?;
            Ok(MemberStanding {
                user_id: member.user_id,
                display_name: user.display_name,
                join_order: member.join_order,
                role: member.role,
                has_been_paid: member.has_been_paid,
                paid_current_cycle: records.iter().any(|r| r.user_id == member.user_id),
                on_time_ratio: history.on_time_ratio(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let cycle_deadline = match circle.status {
        CircleStatus::Active => circle.current_deadline(),
        _ => None,
    };

    Ok(CircleOverview {
        member_count: members.len(),
        paid_count: members.iter().filter(|m| m.has_been_paid).count(),
        progress: progress(&members),
        next_payee,
        cycle_total: ledger.cycle_total(circle_id, cycle)?,
        cycle_deadline,
        members: standings,
        circle,
    })
}

fn build_dashboard(conn: &Connection, config: &LedgerConfig, user_id: UserId) -> Result<UserDashboard> {
    let user = storage::get_user(conn, user_id)?.ok_or(CircleError::UserNotFound(user_id))?;
    let registry = MembershipRegistry::new(conn, config);

    let circles = storage::circles_for_user(conn, user_id)?
        .into_iter()
        .map(|circle| {
            let members = registry.list_members(circle.id)?;
            let is_paid_out = members
                .iter()
                .any(|m| m.user_id == user_id && m.has_been_paid);
            let next_turn = match circle.status {
                CircleStatus::Forming => "Not started".to_string(),
                CircleStatus::Completed => "Completed".to_string(),
                CircleStatus::Active => match members.iter().find(|m| !m.has_been_paid) {
                    Some(m) if m.user_id == user_id => "Your turn".to_string(),
                    Some(m) => payee_summary(conn, m)?.display_name,
                    None => "Completed".to_string(),
                },
            };
            Ok(CircleSummary {
                id: circle.id,
                name: circle.name,
                amount: circle.contribution_amount,
                frequency: circle.frequency,
                status: circle.status,
                progress: progress(&members),
                next_turn,
                is_paid_out,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(UserDashboard {
        name: user.display_name,
        email: user.email,
        trust_score: user.trust_score,
        total_saved: user.total_saved,
        circles,
    })
}
