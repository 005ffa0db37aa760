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

//! User account state.
//!
//! A [`UserAccount`] guards its mutable state behind a mutex; the lock is
//! held for the whole of every read-modify-write, including the journal
//! append, so a balance change and its ledger entry commit together.
//!
//! # Example
//!
//! ```
//! use points_engine_rs::base::{ReferralCode, UserId};
//! use points_engine_rs::{Tier, UserAccount};
//! use chrono::Utc;
//!
//! let account = UserAccount::new(UserId(1), ReferralCode("AB12CD34".into()), Utc::now());
//! assert_eq!(account.points(), 0);
//! assert_eq!(account.tier(), Tier::P1);
//! ```

use crate::base::{ReferralCode, UserId};
use crate::error::EconomyError;
use crate::ledger::{EntryKind, Journal, LedgerEntry};
use crate::tier::Tier;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

#[derive(Debug)]
pub(crate) struct UserData {
    user_id: UserId,
    points: i64,
    tier: Tier,
    referral_code: ReferralCode,
    referred_by: Option<UserId>,
    attributed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    /// Rolling per-UTC-day referral bonus accounting.
    pool_date: Option<NaiveDate>,
    pool_used: i64,
}

impl UserData {
    fn new(user_id: UserId, referral_code: ReferralCode, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            points: 0,
            tier: Tier::P1,
            referral_code,
            referred_by: None,
            attributed_at: None,
            created_at,
            pool_date: None,
            pool_used: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.points >= 0,
            "Invariant violated: points balance went negative: {}",
            self.points
        );
        debug_assert!(
            self.tier == Tier::from_points(self.points),
            "Invariant violated: tier {} does not match balance {}",
            self.tier,
            self.points
        );
        debug_assert!(
            self.pool_used >= 0,
            "Invariant violated: daily pool went negative: {}",
            self.pool_used
        );
    }

    /// Increases the balance and recomputes the tier.
    pub(crate) fn credit(&mut self, amount: i64) -> Result<i64, EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount);
        }
        self.points += amount;
        self.tier = Tier::from_points(self.points);
        self.assert_invariants();
        Ok(self.points)
    }

    /// Decreases the balance and recomputes the tier.
    pub(crate) fn debit(&mut self, amount: i64) -> Result<i64, EconomyError> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount);
        }
        if self.points < amount {
            return Err(EconomyError::InsufficientFunds);
        }
        self.points -= amount;
        self.tier = Tier::from_points(self.points);
        self.assert_invariants();
        Ok(self.points)
    }

    /// Reserves referral bonus points from the rolling daily pool.
    ///
    /// Resets the pool when the tracked date is not `today`, then awards
    /// `min(bonus, cap - used)`. Returns the amount actually reserved,
    /// zero when the cap is already spent.
    pub(crate) fn take_from_daily_pool(&mut self, bonus: i64, today: NaiveDate, cap: i64) -> i64 {
        if self.pool_date != Some(today) {
            self.pool_date = Some(today);
            self.pool_used = 0;
        }
        let available = cap - self.pool_used;
        if available <= 0 {
            return 0;
        }
        let award = bonus.min(available);
        self.pool_used += award;
        self.assert_invariants();
        award
    }

    /// Records the referrer attribution for this user.
    pub(crate) fn attribute(&mut self, referrer: UserId, at: DateTime<Utc>) {
        self.referred_by = Some(referrer);
        self.attributed_at = Some(at);
    }

    pub(crate) fn referred_by(&self) -> Option<UserId> {
        self.referred_by
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            user_id: self.user_id,
            points: self.points,
            tier: self.tier,
            referral_code: self.referral_code.clone(),
            referred_by: self.referred_by,
            attributed_at: self.attributed_at,
            created_at: self.created_at,
        }
    }
}

/// Point-in-time view of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub points: i64,
    pub tier: Tier,
    pub referral_code: ReferralCode,
    pub referred_by: Option<UserId>,
    pub attributed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A user's economy account.
#[derive(Debug)]
pub struct UserAccount {
    inner: Mutex<UserData>,
}

impl UserAccount {
    pub fn new(user_id: UserId, referral_code: ReferralCode, created_at: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(UserData::new(user_id, referral_code, created_at)),
        }
    }

    pub fn points(&self) -> i64 {
        self.inner.lock().points
    }

    pub fn tier(&self) -> Tier {
        self.inner.lock().tier
    }

    pub fn referral_code(&self) -> ReferralCode {
        self.inner.lock().referral_code.clone()
    }

    pub fn referred_by(&self) -> Option<UserId> {
        self.inner.lock().referred_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.lock().created_at
    }

    pub fn snapshot(&self) -> UserSnapshot {
        self.inner.lock().snapshot()
    }

    /// Credits the balance and journals the change as one atomic unit.
    ///
    /// Returns the new balance.
    pub fn credit(
        &self,
        amount: i64,
        kind: EntryKind,
        related_user: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
        journal: &Journal,
    ) -> Result<i64, EconomyError> {
        let mut data = self.inner.lock();
        let balance = data.credit(amount)?;
        journal.append(LedgerEntry {
            user_id: data.user_id,
            kind,
            delta: amount,
            related_user,
            reason: reason.to_string(),
            at: now,
        });
        Ok(balance)
    }

    /// Debits the balance and journals the charge as one atomic unit.
    ///
    /// Fails with [`EconomyError::InsufficientFunds`] before any state
    /// changes when the balance does not cover `amount`. Returns the new
    /// balance.
    pub fn debit(
        &self,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
        journal: &Journal,
    ) -> Result<i64, EconomyError> {
        let mut data = self.inner.lock();
        let balance = data.debit(amount)?;
        journal.append(LedgerEntry {
            user_id: data.user_id,
            kind: EntryKind::Charge,
            delta: -amount,
            related_user: None,
            reason: reason.to_string(),
            at: now,
        });
        Ok(balance)
    }

    /// Takes the account lock for a multi-step critical section.
    pub(crate) fn lock(&self) -> MutexGuard<'_, UserData> {
        self.inner.lock()
    }
}
