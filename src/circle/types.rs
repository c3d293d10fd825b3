//! Core types for the circle ledger.
//!
//! This module defines the persisted entities (users, circles,
//! memberships, contributions, payouts) and the read models the
//! coordinator hands back to callers.
//!
//! Money values are integers in minor currency units (kobo for naira).
//! Timestamps are Unix seconds.

use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use super::join_code::JoinCode;

/// Trust score assigned to every new user.
pub const DEFAULT_TRUST_SCORE: u16 = 450;

/// Upper bound of the trust score range.
pub const MAX_TRUST_SCORE: u16 = 850;

/// Identifier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircleId(pub i64);

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user identity that the auth layer has already verified.
///
/// The ledger never checks credentials. Whatever authenticates the
/// request builds one of these and passes it to every mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedUser(UserId);

impl VerifiedUser {
    /// Wraps an id the caller has authenticated.
    #[must_use]
    pub const fn new(id: UserId) -> Self {
        Self(id)
    }

    /// The verified user's id.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.0
    }
}

/// How often members contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every 7 days.
    Weekly,
    /// Every 14 days.
    Biweekly,
    /// Every calendar month.
    #[default]
    Monthly,
}

impl Frequency {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
        }
    }

    /// Parses from string representation, ignoring ASCII case.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Some(Self::Weekly),
            "biweekly" => Some(Self::Biweekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    /// End of a period that starts at `start` (Unix seconds).
    ///
    /// Returns `None` if the timestamp is out of range.
    #[must_use]
    pub fn period_end(self, start: i64) -> Option<i64> {
        let start = DateTime::<Utc>::from_timestamp(start, 0)?;
        let end = match self {
            Self::Weekly => start.checked_add_signed(Duration::days(7)),
            Self::Biweekly => start.checked_add_signed(Duration::days(14)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
        }?;
        Some(end.timestamp())
    }
}

/// Lifecycle of a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircleStatus {
    /// Accepting members, no contributions yet.
    Forming,
    /// Collecting contributions and paying out.
    Active,
    /// Every member has been paid once.
    Completed,
}

impl CircleStatus {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forming => "forming",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forming" => Some(Self::Forming),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Role of a member within a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The founder. Exactly one per circle.
    Admin,
    /// Everyone else.
    Member,
}

impl Role {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// A registered saver.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Name shown to other members.
    pub display_name: String,
    /// Unique email address.
    pub email: String,
    /// Punctuality score in `[0, 850]`.
    pub trust_score: u16,
    /// Sum of every contribution the user has made.
    pub total_saved: i64,
    /// Soft-disabled users cannot join or contribute.
    pub disabled: bool,
    /// Signup time.
    pub created_at: i64,
}

/// A rotating savings circle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Circle {
    /// Circle id.
    pub id: CircleId,
    /// Circle name.
    pub name: String,
    /// Amount each member pays per cycle.
    pub contribution_amount: i64,
    /// Contribution cadence.
    pub frequency: Frequency,
    /// Code members use to join.
    pub join_code: JoinCode,
    /// Cycle currently collecting contributions.
    pub current_cycle: u32,
    /// Lifecycle status.
    pub status: CircleStatus,
    /// Start of the current cycle. `None` until the circle starts.
    pub cycle_started_at: Option<i64>,
    /// Founding user.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: i64,
    /// Last mutation time.
    pub updated_at: i64,
}

impl Circle {
    /// Contribution deadline of the current cycle, if the circle has started.
    #[must_use]
    pub fn current_deadline(&self) -> Option<i64> {
        self.cycle_started_at
            .and_then(|start| self.frequency.period_end(start))
    }
}

/// A user's place in a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// The circle.
    pub circle_id: CircleId,
    /// The member.
    pub user_id: UserId,
    /// Rotation position, `0..N-1`.
    pub join_order: u32,
    /// Whether this member already received their payout.
    pub has_been_paid: bool,
    /// Admin or member.
    pub role: Role,
    /// Join time.
    pub joined_at: i64,
}

/// One member's payment for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRecord {
    /// The circle.
    pub circle_id: CircleId,
    /// The cycle paid into.
    pub cycle: u32,
    /// The contributor.
    pub user_id: UserId,
    /// Amount paid.
    pub amount: i64,
    /// When the payment was recorded.
    pub paid_at: i64,
    /// Whether it arrived by the cycle deadline.
    pub on_time: bool,
}

/// The single disbursement of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRecord {
    /// The circle.
    pub circle_id: CircleId,
    /// The funded cycle.
    pub cycle: u32,
    /// Member who received the pot.
    pub recipient: UserId,
    /// Pot size.
    pub amount: i64,
    /// When the payout was issued.
    pub paid_at: i64,
}

/// Parameters for creating a new circle.
#[derive(Debug, Clone)]
pub struct NewCircle {
    /// Circle name.
    pub name: String,
    /// Amount each member pays per cycle.
    pub contribution_amount: i64,
    /// Contribution cadence.
    pub frequency: Frequency,
}

impl NewCircle {
    /// Creates circle parameters with the default (monthly) cadence.
    #[must_use]
    pub fn new(name: impl Into<String>, contribution_amount: i64) -> Self {
        Self {
            name: name.into(),
            contribution_amount,
            frequency: Frequency::default(),
        }
    }

    /// Sets the cadence.
    #[must_use]
    pub const fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }
}

/// Result of circle creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleCreation {
    /// The created circle.
    pub circle: Circle,
    /// Code to share with prospective members.
    pub join_code: JoinCode,
    /// The founder's admin membership.
    pub founder: Membership,
}

/// Result of a recorded contribution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionReceipt {
    /// The stored record.
    pub record: ContributionRecord,
    /// Sum recorded for the cycle so far.
    pub cycle_total: i64,
    /// Whether every member has now paid into the cycle.
    pub cycle_complete: bool,
}

/// A member's trust score before and after a cycle closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustUpdate {
    /// The member.
    pub user_id: UserId,
    /// Score before the cycle closed.
    pub previous: u16,
    /// Score after.
    pub current: u16,
}

/// Everything that changed when a cycle closed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSettlement {
    /// The circle after advancing.
    pub circle: Circle,
    /// The payout issued for the closed cycle.
    pub payout: PayoutRecord,
    /// Trust score changes, in join order.
    pub trust_updates: Vec<TrustUpdate>,
}

/// A member as shown in the circle overview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStanding {
    /// The member.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Rotation position.
    pub join_order: u32,
    /// Admin or member.
    pub role: Role,
    /// Whether this member already received their payout.
    pub has_been_paid: bool,
    /// Whether the member has paid into the current cycle.
    pub paid_current_cycle: bool,
    /// On-time contributions over all contributions. `None` before the first.
    pub on_time_ratio: Option<f64>,
}

/// The member due to receive the next payout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeSummary {
    /// The member.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Rotation position.
    pub join_order: u32,
}

/// Progress of a circle, derived from ledger state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleOverview {
    /// The circle.
    pub circle: Circle,
    /// Number of members.
    pub member_count: usize,
    /// Members already paid out.
    pub paid_count: usize,
    /// `paid_count / member_count`.
    pub progress: f64,
    /// Next member in the rotation. `None` once the circle is completed.
    pub next_payee: Option<PayeeSummary>,
    /// Sum recorded for the current cycle.
    pub cycle_total: i64,
    /// Deadline of the current cycle, if started.
    pub cycle_deadline: Option<i64>,
    /// Members in join order.
    pub members: Vec<MemberStanding>,
}

/// One circle on a user's dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleSummary {
    /// Circle id.
    pub id: CircleId,
    /// Circle name.
    pub name: String,
    /// Contribution amount.
    pub amount: i64,
    /// Contribution cadence.
    pub frequency: Frequency,
    /// Lifecycle status.
    pub status: CircleStatus,
    /// Share of members already paid out.
    pub progress: f64,
    /// Human-readable label of whose turn is next.
    pub next_turn: String,
    /// Whether this user has been paid in the circle.
    pub is_paid_out: bool,
}

/// A user's profile with their circles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDashboard {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Current trust score.
    pub trust_score: u16,
    /// Lifetime contributions.
    pub total_saved: i64,
    /// Circles the user belongs to.
    pub circles: Vec<CircleSummary>,
}
