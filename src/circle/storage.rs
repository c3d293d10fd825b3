//! `SQLite` storage for the circle ledger.
//!
//! [`CircleStorage`] owns a pool of connections and hands out
//! transactions. File-backed databases run in WAL mode, so readers never
//! wait on a writer and writers only queue on `SQLite`'s own write lock,
//! bounded by `busy_timeout`. The free functions in this module read and
//! write rows on any connection or transaction; the registry, ledger and
//! rotation scheduler build on them.

// SQLite operations need to hold the connection for the duration of the transaction.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;

use log::warn;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use super::error::{CircleError, Result};
use super::join_code::JoinCode;
use super::types::{
    Circle, CircleId, CircleStatus, ContributionRecord, Frequency, Membership, PayoutRecord,
    Role, User, UserId,
};
use crate::config::LedgerConfig;

/// `SQLite`-based storage for ledger data.
///
/// Thread-safe pool of `SQLite` connections. Every mutation runs in an
/// `IMMEDIATE` transaction so check-then-insert sequences are atomic.
pub struct CircleStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl CircleStorage {
    /// Opens (or creates) the database at `path` in WAL mode.
    ///
    /// Uses `config.pool_size` connections. Each waits up to
    /// `config.busy_timeout` on a locked database before failing with
    /// [`CircleError::StorageTimeout`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(path: &Path, config: &LedgerConfig) -> Result<Self> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
            )
        });
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(config.storage_timeout);
        Self::from_manager(pool, manager)
    }

    /// Creates an in-memory storage instance for testing.
    ///
    /// An in-memory database lives in one connection, so the pool holds
    /// exactly one and every call is serialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.busy_timeout(std::time::Duration::from_secs(1))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        // The database dies with its connection, so it is never recycled.
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(std::time::Duration::from_secs(30));
        Self::from_manager(pool, manager)
    }

    fn from_manager(
        pool: r2d2::Builder<SqliteConnectionManager>,
        manager: SqliteConnectionManager,
    ) -> Result<Self> {
        let pool = pool
            .build(manager)
            .map_err(|e| CircleError::Storage(format!("Failed to build connection pool: {e}")))?;
        let storage = Self { pool };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                trust_score INTEGER NOT NULL DEFAULT 450
                    CHECK (trust_score BETWEEN 0 AND 850),
                total_saved INTEGER NOT NULL DEFAULT 0 CHECK (total_saved >= 0),
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS circles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                contribution_amount INTEGER NOT NULL CHECK (contribution_amount > 0),
                frequency TEXT NOT NULL,
                join_code TEXT NOT NULL UNIQUE,
                current_cycle INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'forming',
                cycle_started_at INTEGER,
                created_by INTEGER NOT NULL REFERENCES users(id),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Rotation order is the join order; both pairs are unique per circle.
            CREATE TABLE IF NOT EXISTS circle_members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                circle_id INTEGER NOT NULL REFERENCES circles(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                join_order INTEGER NOT NULL,
                role TEXT NOT NULL,
                has_been_paid INTEGER NOT NULL DEFAULT 0,
                joined_at INTEGER NOT NULL,
                UNIQUE (circle_id, user_id),
                UNIQUE (circle_id, join_order)
            );

            -- Append-only.
            CREATE TABLE IF NOT EXISTS contributions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                circle_id INTEGER NOT NULL REFERENCES circles(id),
                cycle INTEGER NOT NULL,
                user_id INTEGER NOT NULL REFERENCES users(id),
                amount INTEGER NOT NULL CHECK (amount > 0),
                paid_at INTEGER NOT NULL,
                on_time INTEGER NOT NULL,
                UNIQUE (circle_id, cycle, user_id)
            );

            CREATE TABLE IF NOT EXISTS payouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                circle_id INTEGER NOT NULL REFERENCES circles(id),
                cycle INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL REFERENCES users(id),
                amount INTEGER NOT NULL,
                paid_at INTEGER NOT NULL,
                UNIQUE (circle_id, cycle)
            );

            CREATE INDEX IF NOT EXISTS idx_circle_members_user ON circle_members(user_id);
            ",
        )?;

        Ok(())
    }

    /// Checks a connection out of the pool.
    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            warn!("no database connection available: {e}");
            CircleError::StorageTimeout
        })
    }

    /// Runs `f` inside an `IMMEDIATE` transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a storage error if the transaction
    /// cannot begin or commit.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Runs `f` inside a read transaction, giving it a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or a storage error.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.finish()?;
        Ok(value)
    }
}

// ==================== User Rows ====================

const USER_COLUMNS: &str =
    "id, display_name, email, trust_score, total_saved, disabled, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        display_name: row.get(1)?,
        email: row.get(2)?,
        trust_score: row.get(3)?,
        total_saved: row.get(4)?,
        disabled: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
    })
}

/// Inserts a user with the default trust score and returns it.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_user(conn: &Connection, display_name: &str, email: &str, now: i64) -> Result<User> {
    conn.execute(
        "INSERT INTO users (display_name, email, created_at) VALUES (?1, ?2, ?3)",
        params![display_name, email, now],
    )?;
    let id = UserId(conn.last_insert_rowid());
    get_user(conn, id)?.ok_or(CircleError::UserNotFound(id))
}

/// Retrieves a user by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.0], user_from_row)
        .optional()?)
}

/// Retrieves a user by email.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    Ok(conn
        .query_row(&sql, params![email], user_from_row)
        .optional()?)
}

/// Retrieves a user, failing if missing or disabled.
///
/// # Errors
///
/// Returns [`CircleError::UserNotFound`] or [`CircleError::UserDisabled`].
pub fn require_active_user(conn: &Connection, id: UserId) -> Result<User> {
    let user = get_user(conn, id)?.ok_or(CircleError::UserNotFound(id))?;
    if user.disabled {
        return Err(CircleError::UserDisabled(id));
    }
    Ok(user)
}

/// Soft-disables a user.
///
/// # Errors
///
/// Returns [`CircleError::UserNotFound`] if no row was updated.
pub fn disable_user(conn: &Connection, id: UserId) -> Result<()> {
    let rows = conn.execute("UPDATE users SET disabled = 1 WHERE id = ?1", params![id.0])?;
    if rows == 0 {
        return Err(CircleError::UserNotFound(id));
    }
    Ok(())
}

/// Sets a user's trust score.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_trust_score(conn: &Connection, id: UserId, score: u16) -> Result<()> {
    conn.execute(
        "UPDATE users SET trust_score = ?1 WHERE id = ?2",
        params![score, id.0],
    )?;
    Ok(())
}

/// Adds `amount` to a user's lifetime savings.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn add_to_total_saved(conn: &Connection, id: UserId, amount: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET total_saved = total_saved + ?1 WHERE id = ?2",
        params![amount, id.0],
    )?;
    Ok(())
}

// ==================== Circle Rows ====================

const CIRCLE_COLUMNS: &str = "id, name, contribution_amount, frequency, join_code, current_cycle, \
     status, cycle_started_at, created_by, created_at, updated_at";

type CircleRow = (
    i64,
    String,
    i64,
    String,
    String,
    u32,
    String,
    Option<i64>,
    i64,
    i64,
    i64,
);

fn circle_row(row: &Row<'_>) -> rusqlite::Result<CircleRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn circle_from_row(raw: CircleRow) -> Result<Circle> {
    let (
        id,
        name,
        contribution_amount,
        frequency_str,
        join_code,
        current_cycle,
        status_str,
        cycle_started_at,
        created_by,
        created_at,
        updated_at,
    ) = raw;

    let frequency = Frequency::parse(&frequency_str)
        .ok_or_else(|| CircleError::InvalidData(format!("Invalid frequency: {frequency_str}")))?;
    let status = CircleStatus::parse(&status_str)
        .ok_or_else(|| CircleError::InvalidData(format!("Invalid status: {status_str}")))?;
    let join_code = JoinCode::parse(&join_code)
        .map_err(|_| CircleError::InvalidData(format!("Invalid join code: {join_code}")))?;

    Ok(Circle {
        id: CircleId(id),
        name,
        contribution_amount,
        frequency,
        join_code,
        current_cycle,
        status,
        cycle_started_at,
        created_by: UserId(created_by),
        created_at,
        updated_at,
    })
}

/// Inserts a circle in `Forming` status and returns it.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_circle(
    conn: &Connection,
    name: &str,
    contribution_amount: i64,
    frequency: Frequency,
    join_code: &JoinCode,
    created_by: UserId,
    now: i64,
) -> Result<Circle> {
    conn.execute(
        r"
        INSERT INTO circles (name, contribution_amount, frequency, join_code, status, created_by, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        ",
        params![
            name,
            contribution_amount,
            frequency.as_str(),
            join_code.as_str(),
            CircleStatus::Forming.as_str(),
            created_by.0,
            now,
        ],
    )?;
    let id = CircleId(conn.last_insert_rowid());
    get_circle(conn, id)?.ok_or_else(|| CircleError::CircleNotFound(id.to_string()))
}

/// Retrieves a circle by id.
///
/// # Errors
///
/// Returns an error if the database operation fails or the row is corrupt.
pub fn get_circle(conn: &Connection, id: CircleId) -> Result<Option<Circle>> {
    let sql = format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = ?1");
    conn.query_row(&sql, params![id.0], circle_row)
        .optional()?
        .map(circle_from_row)
        .transpose()
}

/// Retrieves a circle, failing if missing.
///
/// # Errors
///
/// Returns [`CircleError::CircleNotFound`] if no circle has this id.
pub fn require_circle(conn: &Connection, id: CircleId) -> Result<Circle> {
    get_circle(conn, id)?.ok_or_else(|| CircleError::CircleNotFound(id.to_string()))
}

/// Retrieves a circle by join code.
///
/// # Errors
///
/// Returns an error if the database operation fails or the row is corrupt.
pub fn get_circle_by_code(conn: &Connection, code: &JoinCode) -> Result<Option<Circle>> {
    let sql = format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE join_code = ?1");
    conn.query_row(&sql, params![code.as_str()], circle_row)
        .optional()?
        .map(circle_from_row)
        .transpose()
}

/// Whether any circle already uses `code`.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn join_code_exists(conn: &Connection, code: &JoinCode) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM circles WHERE join_code = ?1",
            params![code.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Circles the user belongs to, ordered by join time.
///
/// # Errors
///
/// Returns an error if the database operation fails or a row is corrupt.
pub fn circles_for_user(conn: &Connection, user: UserId) -> Result<Vec<Circle>> {
    let mut stmt = conn.prepare(
        r"
        SELECT c.id, c.name, c.contribution_amount, c.frequency, c.join_code, c.current_cycle,
               c.status, c.cycle_started_at, c.created_by, c.created_at, c.updated_at
        FROM circles c
        JOIN circle_members m ON c.id = m.circle_id
        WHERE m.user_id = ?1
        ORDER BY m.joined_at, c.id
        ",
    )?;

    let rows = stmt
        .query_map(params![user.0], circle_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(circle_from_row).collect()
}

/// Writes the mutable circle fields (cycle, status, cycle start).
///
/// # Errors
///
/// Returns [`CircleError::CircleNotFound`] if no row was updated.
pub fn update_circle_progress(conn: &Connection, circle: &Circle, now: i64) -> Result<()> {
    let rows = conn.execute(
        r"
        UPDATE circles
        SET current_cycle = ?1, status = ?2, cycle_started_at = ?3, updated_at = ?4
        WHERE id = ?5
        ",
        params![
            circle.current_cycle,
            circle.status.as_str(),
            circle.cycle_started_at,
            now,
            circle.id.0,
        ],
    )?;
    if rows == 0 {
        return Err(CircleError::CircleNotFound(circle.id.to_string()));
    }
    Ok(())
}

// ==================== Membership Rows ====================

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, u32, bool, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i32>(3)? != 0,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn membership_from_parts(parts: (i64, i64, u32, bool, String, i64)) -> Result<Membership> {
    let (circle_id, user_id, join_order, has_been_paid, role_str, joined_at) = parts;
    let role = Role::parse(&role_str)
        .ok_or_else(|| CircleError::InvalidData(format!("Invalid role: {role_str}")))?;
    Ok(Membership {
        circle_id: CircleId(circle_id),
        user_id: UserId(user_id),
        join_order,
        has_been_paid,
        role,
        joined_at,
    })
}

/// Inserts a membership row.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_membership(conn: &Connection, membership: &Membership) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_members (circle_id, user_id, join_order, role, has_been_paid, joined_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            membership.circle_id.0,
            membership.user_id.0,
            membership.join_order,
            membership.role.as_str(),
            i32::from(membership.has_been_paid),
            membership.joined_at,
        ],
    )?;
    Ok(())
}

/// Retrieves one membership.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_membership(
    conn: &Connection,
    circle: CircleId,
    user: UserId,
) -> Result<Option<Membership>> {
    conn.query_row(
        r"
        SELECT circle_id, user_id, join_order, has_been_paid, role, joined_at
        FROM circle_members
        WHERE circle_id = ?1 AND user_id = ?2
        ",
        params![circle.0, user.0],
        membership_from_row,
    )
    .optional()?
    .map(membership_from_parts)
    .transpose()
}

/// Memberships of a circle, ordered by join order.
///
/// # Errors
///
/// Returns an error if the database operation fails or a row is corrupt.
pub fn memberships(conn: &Connection, circle: CircleId) -> Result<Vec<Membership>> {
    let mut stmt = conn.prepare(
        r"
        SELECT circle_id, user_id, join_order, has_been_paid, role, joined_at
        FROM circle_members
        WHERE circle_id = ?1
        ORDER BY join_order
        ",
    )?;

    let rows = stmt
        .query_map(params![circle.0], membership_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(membership_from_parts).collect()
}

/// Number of members in a circle.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn member_count(conn: &Connection, circle: CircleId) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM circle_members WHERE circle_id = ?1",
        params![circle.0],
        |row| row.get(0),
    )?;
    usize::try_from(count).map_err(|_| CircleError::InvalidData(format!("Invalid count: {count}")))
}

/// Marks a member as paid out.
///
/// # Errors
///
/// Returns [`CircleError::NotAMember`] if no row was updated.
pub fn mark_paid(conn: &Connection, circle: CircleId, user: UserId) -> Result<()> {
    let rows = conn.execute(
        "UPDATE circle_members SET has_been_paid = 1 WHERE circle_id = ?1 AND user_id = ?2",
        params![circle.0, user.0],
    )?;
    if rows == 0 {
        return Err(CircleError::NotAMember { user, circle });
    }
    Ok(())
}

// ==================== Contribution Rows ====================

fn contribution_from_row(row: &Row<'_>) -> rusqlite::Result<ContributionRecord> {
    Ok(ContributionRecord {
        circle_id: CircleId(row.get(0)?),
        cycle: row.get(1)?,
        user_id: UserId(row.get(2)?),
        amount: row.get(3)?,
        paid_at: row.get(4)?,
        on_time: row.get::<_, i32>(5)? != 0,
    })
}

/// Appends a contribution record.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_contribution(conn: &Connection, record: &ContributionRecord) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO contributions (circle_id, cycle, user_id, amount, paid_at, on_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            record.circle_id.0,
            record.cycle,
            record.user_id.0,
            record.amount,
            record.paid_at,
            i32::from(record.on_time),
        ],
    )?;
    Ok(())
}

/// Retrieves the contribution for one (circle, cycle, user).
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_contribution(
    conn: &Connection,
    circle: CircleId,
    cycle: u32,
    user: UserId,
) -> Result<Option<ContributionRecord>> {
    Ok(conn
        .query_row(
            r"
            SELECT circle_id, cycle, user_id, amount, paid_at, on_time
            FROM contributions
            WHERE circle_id = ?1 AND cycle = ?2 AND user_id = ?3
            ",
            params![circle.0, cycle, user.0],
            contribution_from_row,
        )
        .optional()?)
}

/// Contributions recorded for a cycle, in recording order.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn contributions_for_cycle(
    conn: &Connection,
    circle: CircleId,
    cycle: u32,
) -> Result<Vec<ContributionRecord>> {
    let mut stmt = conn.prepare(
        r"
        SELECT circle_id, cycle, user_id, amount, paid_at, on_time
        FROM contributions
        WHERE circle_id = ?1 AND cycle = ?2
        ORDER BY id
        ",
    )?;
    let records = stmt
        .query_map(params![circle.0, cycle], contribution_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Every contribution a user made to a circle, oldest first.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn contributions_for_member(
    conn: &Connection,
    circle: CircleId,
    user: UserId,
) -> Result<Vec<ContributionRecord>> {
    let mut stmt = conn.prepare(
        r"
        SELECT circle_id, cycle, user_id, amount, paid_at, on_time
        FROM contributions
        WHERE circle_id = ?1 AND user_id = ?2
        ORDER BY cycle
        ",
    )?;
    let records = stmt
        .query_map(params![circle.0, user.0], contribution_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

// ==================== Payout Rows ====================

fn payout_from_row(row: &Row<'_>) -> rusqlite::Result<PayoutRecord> {
    Ok(PayoutRecord {
        circle_id: CircleId(row.get(0)?),
        cycle: row.get(1)?,
        recipient: UserId(row.get(2)?),
        amount: row.get(3)?,
        paid_at: row.get(4)?,
    })
}

/// Inserts a payout record.
///
/// # Errors
///
/// Returns an error if the database operation fails, including when a
/// payout for the cycle already exists.
pub fn insert_payout(conn: &Connection, payout: &PayoutRecord) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO payouts (circle_id, cycle, recipient_id, amount, paid_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
        params![
            payout.circle_id.0,
            payout.cycle,
            payout.recipient.0,
            payout.amount,
            payout.paid_at,
        ],
    )?;
    Ok(())
}

/// Retrieves the payout for a cycle.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_payout(conn: &Connection, circle: CircleId, cycle: u32) -> Result<Option<PayoutRecord>> {
    Ok(conn
        .query_row(
            r"
            SELECT circle_id, cycle, recipient_id, amount, paid_at
            FROM payouts
            WHERE circle_id = ?1 AND cycle = ?2
            ",
            params![circle.0, cycle],
            payout_from_row,
        )
        .optional()?)
}

/// Every payout of a circle, by cycle.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn payouts(conn: &Connection, circle: CircleId) -> Result<Vec<PayoutRecord>> {
    let mut stmt = conn.prepare(
        r"
        SELECT circle_id, cycle, recipient_id, amount, paid_at
        FROM payouts
        WHERE circle_id = ?1
        ORDER BY cycle
        ",
    )?;
    let records = stmt
        .query_map(params![circle.0], payout_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}
