//! Reusable helpers for coordinator integration tests.
//!
//! Each coordinator gets its own in-memory database and a manual clock, so
//! tests control time and never share state.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use padisave_core::circle::{
    CircleCoordinator, CircleId, CircleStorage, JoinCode, JoinCodeSource, ManualClock, NewCircle,
    VerifiedUser,
};
use padisave_core::LedgerConfig;

/// Clock reading at the start of every test (2023-11-14T22:13:20Z).
pub const START: i64 = 1_700_000_000;

/// One weekly period in seconds.
pub const WEEK: i64 = 7 * 86_400;

/// Routes `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Join codes handed out in a fixed order. The last one repeats forever.
pub struct ScriptedCodes {
    codes: Mutex<VecDeque<&'static str>>,
}

impl ScriptedCodes {
    pub fn new(codes: &[&'static str]) -> Self {
        Self {
            codes: Mutex::new(codes.iter().copied().collect()),
        }
    }
}

impl JoinCodeSource for ScriptedCodes {
    fn next_code(&self) -> JoinCode {
        let mut codes = self.codes.lock().expect("codes lock");
        let code = if codes.len() > 1 {
            codes.pop_front().expect("non-empty")
        } else {
            *codes.front().expect("at least one scripted code")
        };
        JoinCode::parse(code).expect("scripted code is valid")
    }
}

/// In-memory coordinator with a manual clock set to [`START`].
pub fn coordinator(config: LedgerConfig) -> (CircleCoordinator, Arc<ManualClock>) {
    init_logging();
    let clock = Arc::new(ManualClock::new(START));
    let storage = CircleStorage::in_memory().expect("in-memory storage");
    let coordinator = CircleCoordinator::new(storage, config).with_clock(clock.clone());
    (coordinator, clock)
}

/// Registers `name` with a derived email address.
pub async fn register(coordinator: &CircleCoordinator, name: &str) -> VerifiedUser {
    let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
    let user = coordinator
        .register_user(name, &email)
        .await
        .expect("register user");
    VerifiedUser::new(user.id)
}

/// Creates a weekly circle of `names.len()` members paying `amount`, with
/// the first name as admin, and starts it. Members are returned in join
/// order.
pub async fn active_circle(
    coordinator: &CircleCoordinator,
    amount: i64,
    names: &[&str],
) -> (CircleId, Vec<VerifiedUser>) {
    let mut members = Vec::with_capacity(names.len());
    for name in names {
        members.push(register(coordinator, name).await);
    }

    let created = coordinator
        .create_circle(&members[0], NewCircle::new("Test circle", amount))
        .await
        .expect("create circle");
    for member in &members[1..] {
        coordinator
            .join_circle(member, created.join_code.as_str())
            .await
            .expect("join circle");
    }
    coordinator
        .start_circle(&members[0], created.circle.id)
        .await
        .expect("start circle");

    (created.circle.id, members)
}
