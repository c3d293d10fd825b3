//! Rotating savings circles.
//!
//! A circle is a fixed group of members who each pay the same amount into
//! a shared pot every cycle. Each cycle one member, chosen by join order,
//! collects the whole pot. The circle completes when every member has
//! collected once.
//!
//! # Architecture
//!
//! ```text
//! CircleCoordinator (async API, per-circle locks, timeouts)
//!     ├── MembershipRegistry (circles, join codes, rosters)
//!     ├── ContributionLedger (append-only payments)
//!     ├── RotationScheduler (payee selection, cycle close)
//!     │       └── trust (score updates)
//!     └── CircleStorage (pooled SQLite, WAL)
//! ```
//!
//! The registry, ledger, and scheduler are thin views over one storage
//! transaction; the coordinator decides transaction boundaries.
//!
//! # Types
//!
//! - [`Circle`]: A savings group and its rotation progress
//! - [`Membership`]: A user's seat and payout status in a circle
//! - [`ContributionRecord`]: One payment into one cycle
//! - [`PayoutRecord`]: One cycle's pot paid to one member
//! - [`CircleOverview`] / [`UserDashboard`]: Derived read models

mod coordinator;
mod error;
pub mod join_code;
mod ledger;
mod locks;
mod registry;
mod rotation;
pub mod storage;
pub mod trust;
pub mod types;

pub use coordinator::{CircleCoordinator, Clock, SystemClock, DB_FILE_NAME};
#[cfg(any(test, feature = "test-utils"))]
pub use coordinator::ManualClock;
pub use error::{CircleError, ErrorKind, Result};
pub use join_code::{JoinCode, JoinCodeSource, RandomJoinCodes};
pub use ledger::{ContributionLedger, PaymentHistory};
pub use locks::{CircleGuard, CircleLocks};
pub use registry::{issue_circle, MembershipRegistry};
pub use rotation::RotationScheduler;
pub use storage::CircleStorage;
pub use types::{
    Circle, CircleCreation, CircleId, CircleOverview, CircleStatus, CircleSummary,
    ContributionReceipt, ContributionRecord, CycleSettlement, Frequency, MemberStanding,
    Membership, NewCircle, PayeeSummary, PayoutRecord, Role, TrustUpdate, User, UserDashboard,
    UserId, VerifiedUser,
};
