// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! The referral credit is the only operation that holds two account locks
//! at once; it orders them by ascending user id. These tests hammer that
//! path from both directions, mixed with single-lock operations, and let
//! the detector look for cycles in the lock graph.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::deadlock;
use points_engine_rs::{Engine, OrderKind, PaymentMethod, UserId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn day_zero() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Watches for deadlocks until `stop` flips; counts detected cycles.
fn spawn_detector(stop: Arc<AtomicBool>, detected: Arc<AtomicUsize>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(50));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                detected.fetch_add(deadlocks.len(), Ordering::Relaxed);
            }
        }
    })
}

fn with_detector(test: impl FnOnce()) {
    let stop = Arc::new(AtomicBool::new(false));
    let detected = Arc::new(AtomicUsize::new(0));
    let watchdog = spawn_detector(Arc::clone(&stop), Arc::clone(&detected));

    test();

    stop.store(true, Ordering::Relaxed);
    watchdog.join().unwrap();
    assert_eq!(
        detected.load(Ordering::Relaxed),
        0,
        "deadlock detected in lock graph"
    );
}

#[test]
fn bidirectional_referrals_do_not_deadlock() {
    with_detector(|| {
        let engine = Arc::new(Engine::new());
        let now = day_zero();
        engine.get_or_create_user(UserId(1), now).unwrap();
        engine.get_or_create_user(UserId(2), now).unwrap();

        // Mirror-image referral credits: one thread credits 1 for
        // referring 2, the other credits 2 for referring 1. Without a
        // fixed lock order this is the textbook deadlock shape.
        let forward = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..500 {
                    let _ = engine.credit_referral(UserId(1), UserId(2), false, now);
                }
            })
        };
        let backward = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..500 {
                    let _ = engine.credit_referral(UserId(2), UserId(1), false, now);
                }
            })
        };

        forward.join().unwrap();
        backward.join().unwrap();
    });
}

#[test]
fn referral_ring_does_not_deadlock() {
    with_detector(|| {
        let engine = Arc::new(Engine::new());
        let now = day_zero();
        for id in 1..=4u64 {
            engine.get_or_create_user(UserId(id), now).unwrap();
        }

        // A ring of referral credits: 1->2, 2->3, 3->4, 4->1 concurrently.
        let handles: Vec<_> = (1..=4u64)
            .map(|id| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let subject = UserId(id % 4 + 1);
                    for _ in 0..300 {
                        let _ = engine.credit_referral(UserId(id), subject, false, now);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    });
}

#[test]
fn referrals_mixed_with_single_lock_traffic() {
    with_detector(|| {
        let engine = Arc::new(Engine::new());
        let now = day_zero();
        for id in 1..=3u64 {
            engine.get_or_create_user(UserId(id), now).unwrap();
            engine.credit(UserId(id), 10_000, "seed", now).unwrap();
        }

        let mut handles = Vec::new();

        // Referral credits in both directions between 1 and 2.
        for (referrer, subject) in [(1u64, 2u64), (2, 1)] {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _ =
                        engine.credit_referral(UserId(referrer), UserId(subject), false, now);
                }
            }));
        }

        // Orders against the same referrer accounts.
        for id in [1u64, 2] {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _ = engine.create_order(UserId(id), OrderKind::Image, 5, now);
                }
            }));
        }

        // Purchase confirmations racing the referral credits for user 3.
        {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let payment = engine
                        .create_payment(UserId(3), "20", PaymentMethod::Alipay, now)
                        .unwrap();
                    engine
                        .complete_payment(&payment.payment_no, now, now)
                        .unwrap();
                }
            }));
        }
        {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _ = engine.credit_referral(UserId(3), UserId(1), false, now);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Sanity: every ledger entry reconciles after the storm.
        for id in 1..=3u64 {
            assert_eq!(
                engine.journal().net_delta(&UserId(id)),
                engine.balance(&UserId(id)).unwrap()
            );
        }
    });
}

#[test]
fn concurrent_user_creation_with_referrals() {
    with_detector(|| {
        let engine = Arc::new(Engine::new());
        let now = day_zero();
        engine.get_or_create_user(UserId(1), now).unwrap();
        let code = engine.get_user(&UserId(1)).unwrap().referral_code;

        // Many new users arriving through the same referral link at once.
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let engine = Arc::clone(&engine);
                let code = code.0.clone();
                thread::spawn(move || {
                    for i in 0..50u64 {
                        let subject = UserId(1_000 + t * 100 + i);
                        engine.process_referral(&code, subject, now).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // The daily cap bounds whatever landed.
        let earned = engine.balance(&UserId(1)).unwrap();
        assert!(earned <= 100, "daily cap breached: {earned}");
    });
}
