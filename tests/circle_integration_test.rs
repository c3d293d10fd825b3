//! Integration tests for the circle coordinator.
//!
//! These tests drive the public async API end to end:
//! - Circle creation, join codes, and rotation order
//! - Contributions, deadlines, and cycle close
//! - Payout rotation through completion
//! - Concurrent joins and contributions
//! - File-backed persistence across reopen
//! - Error kinds and status codes

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{active_circle, coordinator, register, ScriptedCodes, START, WEEK};
use padisave_core::circle::{
    CircleCoordinator, CircleError, CircleStatus, ErrorKind, Frequency, NewCircle, Role,
    DB_FILE_NAME,
};
use padisave_core::LedgerConfig;

// ==================== Circle Creation Tests ====================

mod creation_tests {
    use super::*;

    #[tokio::test]
    async fn founder_is_admin_at_position_zero() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;

        let created = c
            .create_circle(
                &ada,
                NewCircle::new("Market women", 5_000).with_frequency(Frequency::Biweekly),
            )
            .await
            .unwrap();

        assert_eq!(created.circle.status, CircleStatus::Forming);
        assert_eq!(created.circle.current_cycle, 0);
        assert_eq!(created.circle.frequency, Frequency::Biweekly);
        assert_eq!(created.founder.join_order, 0);
        assert_eq!(created.founder.role, Role::Admin);
        assert_eq!(created.join_code.as_str().len(), 6);
        assert!(created
            .join_code
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn colliding_code_is_redrawn() {
        let (c, _) = coordinator(LedgerConfig::default());
        let c = c.with_join_codes(Arc::new(ScriptedCodes::new(&[
            "TAKEN1", "TAKEN1", "FRESH1",
        ])));
        let ada = register(&c, "Ada").await;

        let first = c
            .create_circle(&ada, NewCircle::new("First", 100))
            .await
            .unwrap();
        assert_eq!(first.join_code.as_str(), "TAKEN1");

        let second = c
            .create_circle(&ada, NewCircle::new("Second", 100))
            .await
            .unwrap();
        assert_eq!(second.join_code.as_str(), "FRESH1");
    }

    #[tokio::test]
    async fn exhausted_code_space_fails_cleanly() {
        let config = LedgerConfig::default().with_join_code_attempts(3);
        let (c, _) = coordinator(config);
        let c = c.with_join_codes(Arc::new(ScriptedCodes::new(&["ONLY01"])));
        let ada = register(&c, "Ada").await;

        c.create_circle(&ada, NewCircle::new("First", 100))
            .await
            .unwrap();
        let err = c
            .create_circle(&ada, NewCircle::new("Second", 100))
            .await
            .unwrap_err();

        assert!(matches!(err, CircleError::CodeExhausted(3)));
        assert_eq!(err.status_code(), 500);
        assert_eq!(c.user_dashboard(ada.id()).await.unwrap().circles.len(), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;

        for params in [NewCircle::new("  ", 100), NewCircle::new("Zero", 0)] {
            let err = c.create_circle(&ada, params).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.status_code(), 400);
        }
    }
}

// ==================== Membership Tests ====================

mod membership_tests {
    use super::*;

    #[tokio::test]
    async fn joins_take_contiguous_positions() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola", "Chidi"]).await;

        let roster = c.list_members(circle).await.unwrap();
        let orders: Vec<u32> = roster.iter().map(|m| m.join_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        let ids: Vec<_> = roster.iter().map(|m| m.user_id).collect();
        let expected: Vec<_> = members.iter().map(|m| m.id()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn rejoining_is_a_conflict() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;
        let bola = register(&c, "Bola").await;
        let created = c
            .create_circle(&ada, NewCircle::new("Circle", 100))
            .await
            .unwrap();
        let code = created.join_code.as_str();

        c.join_circle(&bola, code).await.unwrap();
        let err = c.join_circle(&bola, code).await.unwrap_err();
        assert!(matches!(err, CircleError::AlreadyMember { .. }));
        assert_eq!(err.status_code(), 409);

        let err = c.join_circle(&ada, code).await.unwrap_err();
        assert!(matches!(err, CircleError::AlreadyMember { .. }));
    }

    #[tokio::test]
    async fn started_circle_is_closed_to_new_members() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, _) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;
        let code = c.circle_overview(circle).await.unwrap().circle.join_code;

        let late = register(&c, "Late").await;
        let err = c.join_circle(&late, code.as_str()).await.unwrap_err();
        assert!(matches!(err, CircleError::CircleNotJoinable(_)));
    }

    #[tokio::test]
    async fn member_cap_is_enforced() {
        let (c, _) = coordinator(LedgerConfig::default().with_max_members(2));
        let ada = register(&c, "Ada").await;
        let bola = register(&c, "Bola").await;
        let chidi = register(&c, "Chidi").await;
        let created = c
            .create_circle(&ada, NewCircle::new("Pair", 100))
            .await
            .unwrap();

        c.join_circle(&bola, created.join_code.as_str())
            .await
            .unwrap();
        let err = c
            .join_circle(&chidi, created.join_code.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::CircleFull { max: 2, .. }));
    }

    #[tokio::test]
    async fn circle_needs_two_members_to_start() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;
        let created = c
            .create_circle(&ada, NewCircle::new("Solo", 100))
            .await
            .unwrap();

        let err = c.start_circle(&ada, created.circle.id).await.unwrap_err();
        assert!(matches!(err, CircleError::NotEnoughMembers { count: 1, .. }));
    }
}

// ==================== Contribution Tests ====================

mod contribution_tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_submission_leaves_ledger_unchanged() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;

        let first = c
            .submit_contribution(&members[1], circle, 0, 1_000)
            .await
            .unwrap();
        assert!(first.record.on_time);
        assert!(!first.cycle_complete);

        let err = c
            .submit_contribution(&members[1], circle, 0, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CircleError::DuplicateContribution { cycle: 0, .. }
        ));

        let overview = c.circle_overview(circle).await.unwrap();
        assert_eq!(overview.cycle_total, 1_000);
        let saved = c.get_user(members[1].id()).await.unwrap().total_saved;
        assert_eq!(saved, 1_000);
    }

    #[tokio::test]
    async fn amount_cycle_and_membership_are_checked() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;
        let outsider = register(&c, "Outsider").await;

        let err = c
            .submit_contribution(&members[0], circle, 0, 500)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CircleError::AmountMismatch {
                expected: 1_000,
                actual: 500
            }
        ));

        let err = c
            .submit_contribution(&members[0], circle, 3, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::CycleClosed { current: 0, .. }));

        let err = c
            .submit_contribution(&outsider, circle, 0, 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::NotAMember { .. }));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn forming_circle_rejects_contributions() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;
        let created = c
            .create_circle(&ada, NewCircle::new("Forming", 100))
            .await
            .unwrap();

        let err = c
            .submit_contribution(&ada, created.circle.id, 0, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::CircleNotActive(_)));
    }

    #[tokio::test]
    async fn deadline_decides_punctuality() {
        let (c, clock) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;

        clock.set(START + WEEK);
        let edge = c
            .submit_contribution(&members[0], circle, 0, 1_000)
            .await
            .unwrap();
        assert!(edge.record.on_time);

        clock.set(START + WEEK + 1);
        let late = c
            .submit_contribution(&members[1], circle, 0, 1_000)
            .await
            .unwrap();
        assert!(!late.record.on_time);
        assert_eq!(late.record.paid_at, START + WEEK + 1);
    }

    #[tokio::test]
    async fn monthly_deadline_follows_the_calendar() {
        let (c, clock) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;
        let bola = register(&c, "Bola").await;

        // 2024-01-31T00:00:00Z; one calendar month later is 2024-02-29.
        let jan_31 = 1_706_659_200;
        let feb_29 = jan_31 + 29 * 86_400;
        clock.set(jan_31);

        let created = c
            .create_circle(
                &ada,
                NewCircle::new("Monthly", 100).with_frequency(Frequency::Monthly),
            )
            .await
            .unwrap();
        c.join_circle(&bola, created.join_code.as_str())
            .await
            .unwrap();
        c.start_circle(&ada, created.circle.id).await.unwrap();

        let overview = c.circle_overview(created.circle.id).await.unwrap();
        assert_eq!(overview.cycle_deadline, Some(feb_29));
    }
}

// ==================== Rotation Tests ====================

mod rotation_tests {
    use super::*;

    #[tokio::test]
    async fn three_members_one_thousand_each() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola", "Chidi"]).await;

        c.submit_contribution(&members[0], circle, 0, 1_000)
            .await
            .unwrap();
        let second = c
            .submit_contribution(&members[1], circle, 0, 1_000)
            .await
            .unwrap();
        assert!(!second.cycle_complete);

        let err = c.advance_cycle(&members[0], circle).await.unwrap_err();
        assert!(matches!(err, CircleError::CycleIncomplete { cycle: 0, .. }));

        let third = c
            .submit_contribution(&members[2], circle, 0, 1_000)
            .await
            .unwrap();
        assert!(third.cycle_complete);
        assert_eq!(third.cycle_total, 3_000);

        let settlement = c.advance_cycle(&members[0], circle).await.unwrap();
        assert_eq!(settlement.payout.recipient, members[0].id());
        assert_eq!(settlement.payout.amount, 3_000);
        assert_eq!(settlement.circle.current_cycle, 1);
        assert_eq!(settlement.circle.status, CircleStatus::Active);
        assert_eq!(settlement.trust_updates.len(), 3);

        let next = c.next_payee(circle).await.unwrap();
        assert_eq!(next.user_id, members[1].id());
        assert_eq!(next.display_name, "Bola");
    }

    #[tokio::test]
    async fn final_payout_completes_the_circle() {
        let (c, clock) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 250, &["Ada", "Bola"]).await;

        for cycle in 0..2_u32 {
            for member in &members {
                c.submit_contribution(member, circle, cycle, 250)
                    .await
                    .unwrap();
            }
            c.advance_cycle(&members[0], circle).await.unwrap();
            clock.advance(WEEK);
        }

        let overview = c.circle_overview(circle).await.unwrap();
        assert_eq!(overview.circle.status, CircleStatus::Completed);
        assert!(overview.next_payee.is_none());
        assert!((overview.progress - 1.0).abs() < f64::EPSILON);
        assert_eq!(overview.cycle_deadline, None);

        let err = c.next_payee(circle).await.unwrap_err();
        assert!(matches!(err, CircleError::NoEligibleMember(_)));

        let err = c
            .submit_contribution(&members[0], circle, 2, 250)
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::CircleNotActive(_)));

        let dashboard = c.user_dashboard(members[1].id()).await.unwrap();
        assert_eq!(dashboard.circles[0].next_turn, "Completed");
        assert!(dashboard.circles[0].is_paid_out);
        assert_eq!(dashboard.total_saved, 500);
        assert_eq!(dashboard.trust_score, 480);
    }

    #[tokio::test]
    async fn cadence_stays_fixed_when_advance_is_late() {
        let (c, clock) = coordinator(LedgerConfig::default());
        let (circle, members) = active_circle(&c, 100, &["Ada", "Bola", "Chidi"]).await;

        for member in &members {
            c.submit_contribution(member, circle, 0, 100).await.unwrap();
        }
        clock.set(START + 3 * WEEK);
        let settlement = c.advance_cycle(&members[0], circle).await.unwrap();

        assert_eq!(settlement.circle.cycle_started_at, Some(START + WEEK));
        assert_eq!(settlement.circle.current_deadline(), Some(START + 2 * WEEK));
        assert_eq!(settlement.payout.paid_at, START + 3 * WEEK);
    }
}

// ==================== Concurrency Tests ====================

mod concurrency_tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;
    use padisave_core::circle::{JoinCode, JoinCodeSource, ManualClock};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_respect_cap_and_order() {
        let (c, _) = coordinator(LedgerConfig::default().with_max_members(5));
        let c = Arc::new(c);
        let ada = register(&c, "Ada").await;
        let created = c
            .create_circle(&ada, NewCircle::new("Busy", 100))
            .await
            .unwrap();

        let mut joiners = Vec::new();
        for i in 0..10 {
            joiners.push(register(&c, &format!("Joiner {i}")).await);
        }

        let handles: Vec<_> = joiners
            .into_iter()
            .map(|joiner| {
                let c = Arc::clone(&c);
                let code = created.join_code.clone();
                tokio::spawn(async move { c.join_circle(&joiner, code.as_str()).await })
            })
            .collect();

        let mut joined = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(CircleError::CircleFull { .. }) => full += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(joined, 4);
        assert_eq!(full, 6);

        let orders: Vec<u32> = c
            .list_members(created.circle.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.join_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_submissions_record_once() {
        let (c, _) = coordinator(LedgerConfig::default());
        let c = Arc::new(c);
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;
        let payer = members[1];

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                tokio::spawn(async move { c.submit_contribution(&payer, circle, 0, 1_000).await })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(CircleError::DuplicateContribution { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(c.get_user(payer.id()).await.unwrap().total_saved, 1_000);
    }

    /// Hands out fresh codes, sleeping before each one while `slow` is set.
    struct GatedCodes {
        slow: AtomicBool,
        next: AtomicU32,
        delay: Duration,
    }

    impl JoinCodeSource for GatedCodes {
        fn next_code(&self) -> JoinCode {
            if self.slow.load(Ordering::SeqCst) {
                std::thread::sleep(self.delay);
            }
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            JoinCode::parse(&format!("GATE{n:02}")).expect("gated code is valid")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_circles_progress_independently() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig::default().with_storage_timeout(Duration::from_millis(150));
        let codes = Arc::new(GatedCodes {
            slow: AtomicBool::new(false),
            next: AtomicU32::new(0),
            delay: Duration::from_millis(400),
        });
        let c = Arc::new(
            CircleCoordinator::open(dir.path(), config)
                .unwrap()
                .with_clock(Arc::new(ManualClock::new(START)))
                .with_join_codes(codes.clone()),
        );
        let (second, second_members) = active_circle(&c, 200, &["Chidi", "Dayo"]).await;
        let efe = register(&c, "Efe").await;

        codes.slow.store(true, Ordering::SeqCst);
        let slow_create = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.create_circle(&efe, NewCircle::new("Slow", 100)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let receipt = c
            .submit_contribution(&second_members[1], second, 0, 200)
            .await
            .unwrap();
        assert_eq!(receipt.cycle_total, 200);
        let overview = c.circle_overview(second).await.unwrap();
        assert_eq!(overview.cycle_total, 200);

        // The slow creation outlives its caller but still lands.
        assert!(matches!(
            slow_create.await.unwrap(),
            Err(CircleError::StorageTimeout)
        ));
        tokio::time::sleep(Duration::from_millis(400)).await;
        let dashboard = c.user_dashboard(efe.id()).await.unwrap();
        assert_eq!(dashboard.circles.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn separate_circles_close_cycles_in_parallel() {
        let (c, _) = coordinator(LedgerConfig::default());
        let c = Arc::new(c);
        let (first, first_members) = active_circle(&c, 100, &["Ada", "Bola"]).await;
        let (second, second_members) = active_circle(&c, 200, &["Chidi", "Dayo"]).await;

        let a = {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                for m in &first_members {
                    c.submit_contribution(m, first, 0, 100).await?;
                }
                c.advance_cycle(&first_members[0], first).await
            })
        };
        let b = {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                for m in &second_members {
                    c.submit_contribution(m, second, 0, 200).await?;
                }
                c.advance_cycle(&second_members[0], second).await
            })
        };

        assert_eq!(a.await.unwrap().unwrap().payout.amount, 200);
        assert_eq!(b.await.unwrap().unwrap().payout.amount, 400);
    }
}

// ==================== Persistence Tests ====================

mod persistence_tests {
    use super::*;
    use padisave_core::circle::ManualClock;

    #[tokio::test]
    async fn ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("ledger");
        let clock = Arc::new(ManualClock::new(START));

        let circle = {
            let c = CircleCoordinator::open(&data_dir, LedgerConfig::default())
                .unwrap()
                .with_clock(clock.clone());
            let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;
            c.submit_contribution(&members[0], circle, 0, 1_000)
                .await
                .unwrap();
            circle
        };
        assert!(data_dir.join(DB_FILE_NAME).exists());

        let c = CircleCoordinator::open(&data_dir, LedgerConfig::default())
            .unwrap()
            .with_clock(clock);
        let overview = c.circle_overview(circle).await.unwrap();
        assert_eq!(overview.circle.status, CircleStatus::Active);
        assert_eq!(overview.cycle_total, 1_000);
        assert_eq!(overview.member_count, 2);
        assert!(overview.members[0].paid_current_cycle);
        assert!(!overview.members[1].paid_current_cycle);
    }

    #[tokio::test]
    async fn reconcile_after_submit() {
        let (c, _) = coordinator(
            LedgerConfig::default().with_read_retries(2, Duration::from_millis(10)),
        );
        let (circle, members) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;

        assert!(c
            .reconcile_contribution(circle, 0, members[0].id())
            .await
            .unwrap()
            .is_none());

        c.submit_contribution(&members[0], circle, 0, 1_000)
            .await
            .unwrap();
        let record = c
            .reconcile_contribution(circle, 0, members[0].id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount, 1_000);
        assert_eq!(record.paid_at, START);
    }
}

// ==================== Read Model Tests ====================

mod read_model_tests {
    use super::*;

    #[tokio::test]
    async fn overview_serializes_as_camel_case() {
        let (c, _) = coordinator(LedgerConfig::default());
        let (circle, _) = active_circle(&c, 1_000, &["Ada", "Bola"]).await;

        let overview = c.circle_overview(circle).await.unwrap();
        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["memberCount"], 2);
        assert_eq!(json["nextPayee"]["displayName"], "Ada");
        assert_eq!(json["circle"]["contributionAmount"], 1_000);
        assert!(json["members"][0].get("onTimeRatio").is_some());
    }

    #[tokio::test]
    async fn dashboard_lists_every_circle() {
        let (c, _) = coordinator(LedgerConfig::default());
        let ada = register(&c, "Ada").await;
        c.create_circle(&ada, NewCircle::new("One", 100))
            .await
            .unwrap();
        c.create_circle(&ada, NewCircle::new("Two", 200))
            .await
            .unwrap();

        let dashboard = c.user_dashboard(ada.id()).await.unwrap();
        assert_eq!(dashboard.name, "Ada");
        assert_eq!(dashboard.email, "ada@example.com");
        let names: Vec<_> = dashboard.circles.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["One", "Two"]);
        assert!(dashboard.circles.iter().all(|s| s.progress == 0.0));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (c, _) = coordinator(LedgerConfig::default());
        let err = c
            .user_dashboard(padisave_core::circle::UserId(99))
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::UserNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
