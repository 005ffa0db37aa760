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

//! UserAccount public API integration tests.

use chrono::{DateTime, TimeZone, Utc};
use points_engine_rs::base::ReferralCode;
use points_engine_rs::{EconomyError, EntryKind, Journal, Tier, UserAccount, UserId};
use std::sync::Arc;
use std::thread;

// === Helper Functions ===

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn new_account(id: u64) -> UserAccount {
    UserAccount::new(UserId(id), ReferralCode("AB12CD34".into()), fixed_now())
}

// === Basic Account Tests ===

#[test]
fn new_account_has_zero_balance() {
    let account = new_account(1);
    assert_eq!(account.points(), 0);
    assert_eq!(account.tier(), Tier::P1);
    assert_eq!(account.referred_by(), None);
    assert_eq!(account.created_at(), fixed_now());
}

#[test]
fn credit_increases_balance() {
    let account = new_account(1);
    let journal = Journal::new();

    let balance = account
        .credit(50, EntryKind::Credit, None, "gift", fixed_now(), &journal)
        .unwrap();
    assert_eq!(balance, 50);
    assert_eq!(account.points(), 50);
}

#[test]
fn multiple_credits_accumulate() {
    let account = new_account(1);
    let journal = Journal::new();

    for amount in [100, 50, 25] {
        account
            .credit(amount, EntryKind::Credit, None, "gift", fixed_now(), &journal)
            .unwrap();
    }
    assert_eq!(account.points(), 175);
    assert_eq!(journal.entry_count(&UserId(1)), 3);
}

#[test]
fn debit_decreases_balance() {
    let account = new_account(1);
    let journal = Journal::new();

    account
        .credit(100, EntryKind::Credit, None, "gift", fixed_now(), &journal)
        .unwrap();
    let balance = account.debit(30, "charge", fixed_now(), &journal).unwrap();
    assert_eq!(balance, 70);
    assert_eq!(account.points(), 70);
}

#[test]
fn debit_insufficient_funds_is_rejected() {
    let account = new_account(1);
    let journal = Journal::new();

    account
        .credit(50, EntryKind::Credit, None, "gift", fixed_now(), &journal)
        .unwrap();
    let result = account.debit(100, "charge", fixed_now(), &journal);
    assert_eq!(result, Err(EconomyError::InsufficientFunds));

    // Balance, tier, and journal untouched.
    assert_eq!(account.points(), 50);
    assert_eq!(account.tier(), Tier::P1);
    assert_eq!(journal.entry_count(&UserId(1)), 1);
}

#[test]
fn debit_on_fresh_account_fails() {
    let account = new_account(1);
    let journal = Journal::new();
    let result = account.debit(10, "charge", fixed_now(), &journal);
    assert_eq!(result, Err(EconomyError::InsufficientFunds));
}

#[test]
fn zero_and_negative_amounts_rejected() {
    let account = new_account(1);
    let journal = Journal::new();

    for amount in [0, -10] {
        assert_eq!(
            account.credit(amount, EntryKind::Credit, None, "x", fixed_now(), &journal),
            Err(EconomyError::InvalidAmount)
        );
        assert_eq!(
            account.debit(amount, "x", fixed_now(), &journal),
            Err(EconomyError::InvalidAmount)
        );
    }
    assert_eq!(journal.entry_count(&UserId(1)), 0);
}

// === Tier Tests ===

#[test]
fn tier_tracks_balance_mutations() {
    let account = new_account(1);
    let journal = Journal::new();
    let now = fixed_now();

    account
        .credit(499, EntryKind::Credit, None, "a", now, &journal)
        .unwrap();
    assert_eq!(account.tier(), Tier::P1);

    account
        .credit(1, EntryKind::Credit, None, "b", now, &journal)
        .unwrap();
    assert_eq!(account.tier(), Tier::P2);

    account
        .credit(9_500, EntryKind::Credit, None, "c", now, &journal)
        .unwrap();
    assert_eq!(account.tier(), Tier::P5);

    account.debit(9_999, "d", now, &journal).unwrap();
    assert_eq!(account.points(), 1);
    assert_eq!(account.tier(), Tier::P1);
}

#[test]
fn debit_then_credit_restores_balance_and_tier() {
    let account = new_account(1);
    let journal = Journal::new();
    let now = fixed_now();

    account
        .credit(2_500, EntryKind::Credit, None, "seed", now, &journal)
        .unwrap();
    let balance_before = account.points();
    let tier_before = account.tier();

    account.debit(600, "charge", now, &journal).unwrap();
    account
        .credit(600, EntryKind::Credit, None, "refund", now, &journal)
        .unwrap();

    assert_eq!(account.points(), balance_before);
    assert_eq!(account.tier(), tier_before);
}

// === Journal Coupling Tests ===

#[test]
fn every_mutation_journals_one_entry() {
    let account = new_account(1);
    let journal = Journal::new();
    let now = fixed_now();

    account
        .credit(100, EntryKind::Credit, None, "a", now, &journal)
        .unwrap();
    account.debit(40, "b", now, &journal).unwrap();
    account
        .credit(10, EntryKind::ReferralBonus, Some(UserId(2)), "c", now, &journal)
        .unwrap();

    let entries = journal.entries_for(&UserId(1));
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].delta, 100);
    assert_eq!(entries[1].delta, -40);
    assert_eq!(entries[1].kind, EntryKind::Charge);
    assert_eq!(entries[2].kind, EntryKind::ReferralBonus);
    assert_eq!(entries[2].related_user, Some(UserId(2)));
    assert_eq!(journal.net_delta(&UserId(1)), account.points());
}

#[test]
fn rejected_mutations_journal_nothing() {
    let account = new_account(1);
    let journal = Journal::new();
    let now = fixed_now();

    let _ = account.debit(10, "a", now, &journal);
    let _ = account.credit(0, EntryKind::Credit, None, "b", now, &journal);
    let _ = account.credit(-3, EntryKind::Credit, None, "c", now, &journal);

    assert_eq!(journal.entry_count(&UserId(1)), 0);
    assert!(journal.is_empty());
}

// === Concurrency Tests ===

#[test]
fn concurrent_credits_all_land() {
    let account = Arc::new(new_account(1));
    let journal = Arc::new(Journal::new());
    let threads = 8;
    let per_thread = 100;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let account = Arc::clone(&account);
            let journal = Arc::clone(&journal);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    account
                        .credit(1, EntryKind::Credit, None, "hammer", fixed_now(), &journal)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(account.points(), threads * per_thread);
    assert_eq!(journal.entry_count(&UserId(1)), (threads * per_thread) as usize);
    assert_eq!(journal.net_delta(&UserId(1)), account.points());
}

#[test]
fn concurrent_debits_never_overdraw() {
    let account = Arc::new(new_account(1));
    let journal = Arc::new(Journal::new());
    account
        .credit(100, EntryKind::Credit, None, "seed", fixed_now(), &journal)
        .unwrap();

    // 8 threads each try 50 single-point debits: 400 attempts, 100 funded.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let account = Arc::clone(&account);
            let journal = Arc::clone(&journal);
            thread::spawn(move || {
                let mut applied = 0i64;
                for _ in 0..50 {
                    if account.debit(1, "hammer", fixed_now(), &journal).is_ok() {
                        applied += 1;
                    }
                }
                applied
            })
        })
        .collect();
    let applied: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(applied, 100);
    assert_eq!(account.points(), 0);
    assert_eq!(journal.net_delta(&UserId(1)), 0);
}
