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

//! Economy engine.
//!
//! The [`Engine`] is the single authority over balances and the lifecycles
//! that mutate them: orders (debit-then-fulfill), payments
//! (credit-on-confirmation), and referral bonuses.
//!
//! # Operations
//!
//! - **Ledger**: credit, debit, balance, tier lookup.
//! - **Orders**: atomic debit-and-create, forward-only fulfillment
//!   transitions.
//! - **Payments**: package-priced creation, link attachment, idempotent
//!   completion, failure, lazy and swept expiry.
//! - **Referrals**: code resolution, attribution with window protection,
//!   daily-capped bonus credits.
//!
//! # Thread Safety
//!
//! Registries are [`DashMap`]s holding `Arc`ed entities; entity state lives
//! behind per-entity mutexes. Registry shard locks are never held across an
//! entity-lock acquisition, and the one operation that locks two users (a
//! referral credit) takes the locks in ascending user-id order.

use crate::base::{
    OrderNo, PaymentNo, UserId, generate_reference, generate_referral_code,
};
use crate::error::EconomyError;
use crate::ledger::{EntryKind, Journal, LedgerEntry};
use crate::order::{Order, OrderKind, OrderSnapshot, OrderTransition};
use crate::payment::{Completion, Payment, PaymentMethod, PaymentSnapshot, find_package};
use crate::referral::{
    ATTRIBUTION_WINDOW_DAYS, DAILY_LIMIT, EXISTING_USER_BONUS, NEW_USER_BONUS, ReferralDenial,
    ReferralOutcome,
};
use crate::tier::Tier;
use crate::user::{UserAccount, UserSnapshot};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use std::sync::Arc;

/// Retry budget for randomly generated references and codes. Collisions are
/// detected at the registry, never assumed impossible.
const MAX_REFERENCE_ATTEMPTS: usize = 16;

/// Economy engine managing users, orders, payments, and the ledger journal.
///
/// # Invariants
///
/// - A user's balance never goes negative.
/// - Every balance change appends exactly one journal entry with a matching
///   delta, committed under the same account lock.
/// - Order and payment status machines only move forward; terminal states
///   accept nothing.
/// - A payment credits the ledger exactly once no matter how often its
///   confirmation is delivered.
pub struct Engine {
    /// User accounts indexed by external user key.
    users: DashMap<UserId, Arc<UserAccount>>,
    /// Referral code index; one owner per code, forever.
    codes: DashMap<String, UserId>,
    /// Orders indexed by reference.
    orders: DashMap<OrderNo, Arc<Order>>,
    /// Payments indexed by reference.
    payments: DashMap<PaymentNo, Arc<Payment>>,
    /// Append-only audit journal.
    journal: Journal,
}

impl Engine {
    /// Creates a new engine with no users, orders, or payments.
    pub fn new() -> Self {
        Engine {
            users: DashMap::new(),
            codes: DashMap::new(),
            orders: DashMap::new(),
            payments: DashMap::new(),
            journal: Journal::new(),
        }
    }

    /// The audit journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    // === Users ===

    /// Fetches the account for `user_id`, creating it on first contact.
    ///
    /// Returns the snapshot and whether the account was just created. New
    /// accounts start with zero points, the lowest tier, and a freshly
    /// allocated referral code.
    pub fn get_or_create_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(UserSnapshot, bool), EconomyError> {
        if let Some(account) = self.users.get(&user_id) {
            return Ok((account.snapshot(), false));
        }

        // Claim a unique referral code before taking the user entry.
        let code = 'claim: {
            for _ in 0..MAX_REFERENCE_ATTEMPTS {
                let candidate = generate_referral_code();
                match self.codes.entry(candidate.0.clone()) {
                    Entry::Occupied(_) => continue,
                    Entry::Vacant(entry) => {
                        entry.insert(user_id);
                        break 'claim candidate;
                    }
                }
            }
            warn!("referral code allocation exhausted - user: {user_id}");
            return Err(EconomyError::ReferenceExhausted);
        };

        match self.users.entry(user_id) {
            Entry::Occupied(existing) => {
                // Lost the race to a concurrent handler; release our code.
                self.codes.remove(&code.0);
                Ok((existing.get().snapshot(), false))
            }
            Entry::Vacant(entry) => {
                info!("user created - id: {user_id}, code: {code}");
                let account = Arc::new(UserAccount::new(user_id, code, now));
                entry.insert(Arc::clone(&account));
                Ok((account.snapshot(), true))
            }
        }
    }

    /// Retrieves a user snapshot by id.
    pub fn get_user(&self, user_id: &UserId) -> Option<UserSnapshot> {
        self.users.get(user_id).map(|account| account.snapshot())
    }

    /// Snapshots of all user accounts, in no particular order.
    pub fn users(&self) -> Vec<UserSnapshot> {
        self.users.iter().map(|entry| entry.snapshot()).collect()
    }

    fn account(&self, user_id: &UserId) -> Result<Arc<UserAccount>, EconomyError> {
        self.users
            .get(user_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EconomyError::UserNotFound)
    }

    // === Ledger ===

    /// Credits `amount` points and returns the new balance.
    pub fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, EconomyError> {
        let account = self.account(&user_id)?;
        let balance = account.credit(amount, EntryKind::Credit, None, reason, now, &self.journal)?;
        info!("credit applied - user: {user_id}, amount: {amount}, balance: {balance}");
        Ok(balance)
    }

    /// Debits `amount` points and returns the new balance.
    ///
    /// Fails with [`EconomyError::InsufficientFunds`] leaving all state
    /// unchanged when the balance does not cover the amount.
    pub fn debit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, EconomyError> {
        let account = self.account(&user_id)?;
        let balance = account.debit(amount, reason, now, &self.journal)?;
        info!("debit applied - user: {user_id}, amount: {amount}, balance: {balance}");
        Ok(balance)
    }

    /// Current points balance.
    pub fn balance(&self, user_id: &UserId) -> Result<i64, EconomyError> {
        Ok(self.account(user_id)?.points())
    }

    /// Current tier.
    pub fn tier(&self, user_id: &UserId) -> Result<Tier, EconomyError> {
        Ok(self.account(user_id)?.tier())
    }

    // === Orders ===

    /// Charges `cost` points and creates the order as one atomic unit.
    ///
    /// The account lock is held across the debit, the order registration,
    /// and the journal append: an order never exists without its charge and
    /// a charge never happens without its order.
    pub fn create_order(
        &self,
        user_id: UserId,
        kind: OrderKind,
        cost: i64,
        now: DateTime<Utc>,
    ) -> Result<OrderSnapshot, EconomyError> {
        let account = self.account(&user_id)?;

        let mut data = account.lock();
        data.debit(cost)?;

        let order = match self.register_order(user_id, kind, cost, now) {
            Ok(order) => order,
            Err(e) => {
                // Roll the charge back inside the same critical section;
                // cost was already validated positive by the debit.
                data.credit(cost).ok();
                warn!("order registration failed - user: {user_id}: {e}");
                return Err(e);
            }
        };
        let snapshot = order.snapshot();
        self.journal.append(LedgerEntry {
            user_id,
            kind: EntryKind::Charge,
            delta: -cost,
            related_user: None,
            reason: format!("{kind} order {}", snapshot.order_no),
            at: now,
        });
        drop(data);

        info!(
            "order created - no: {}, user: {user_id}, kind: {kind}, cost: {cost}",
            snapshot.order_no
        );
        Ok(snapshot)
    }

    fn register_order(
        &self,
        user_id: UserId,
        kind: OrderKind,
        cost: i64,
        now: DateTime<Utc>,
    ) -> Result<Arc<Order>, EconomyError> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let order_no = OrderNo(generate_reference(now));
            match self.orders.entry(order_no.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    let order = Arc::new(Order::new(order_no, user_id, kind, cost, now));
                    entry.insert(Arc::clone(&order));
                    return Ok(order);
                }
            }
        }
        Err(EconomyError::ReferenceExhausted)
    }

    /// Applies a fulfillment report from the generation collaborator.
    pub fn transition_order(
        &self,
        order_no: &OrderNo,
        transition: OrderTransition,
        now: DateTime<Utc>,
    ) -> Result<OrderSnapshot, EconomyError> {
        let order = self
            .orders
            .get(order_no)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EconomyError::OrderNotFound)?;
        let snapshot = order.apply(transition, now)?;
        info!(
            "order updated - no: {order_no}, status: {:?}",
            snapshot.status
        );
        Ok(snapshot)
    }

    /// Retrieves an order snapshot by reference.
    pub fn get_order(&self, order_no: &OrderNo) -> Option<OrderSnapshot> {
        debug!("order lookup - no: {order_no}");
        self.orders.get(order_no).map(|entry| entry.snapshot())
    }

    // === Payments ===

    /// Creates a pending payment from the fixed package table.
    ///
    /// Fails with [`EconomyError::InvalidPackage`] for unknown keys; the
    /// points and price always come from the table, never from the caller.
    pub fn create_payment(
        &self,
        user_id: UserId,
        package_key: &str,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentSnapshot, EconomyError> {
        // The account must exist so the eventual credit has a target.
        self.account(&user_id)?;
        let package = find_package(package_key).ok_or(EconomyError::InvalidPackage)?;

        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let payment_no = PaymentNo(generate_reference(now));
            match self.payments.entry(payment_no.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    let payment =
                        Arc::new(Payment::new(payment_no, user_id, package, method, now));
                    let snapshot = payment.snapshot();
                    entry.insert(payment);
                    info!(
                        "payment created - no: {}, user: {user_id}, package: {package_key}, \
                         method: {method}, amount: {}, points: {}",
                        snapshot.payment_no, snapshot.amount, snapshot.points
                    );
                    return Ok(snapshot);
                }
            }
        }
        Err(EconomyError::ReferenceExhausted)
    }

    /// Records the redirect URL obtained from the payment gateway.
    pub fn attach_payment_link(
        &self,
        payment_no: &PaymentNo,
        url: &str,
    ) -> Result<PaymentSnapshot, EconomyError> {
        let payment = self.payment(payment_no)?;
        let snapshot = payment.attach_url(url)?;
        info!("payment link attached - no: {payment_no}");
        Ok(snapshot)
    }

    /// Applies a gateway confirmation signal.
    ///
    /// Idempotent per payment: the first confirmation moves the payment to
    /// Paid and credits the ledger; redeliveries are no-ops. A pending
    /// payment observed past its validity window expires instead and fails
    /// with [`EconomyError::PaymentExpired`].
    pub fn complete_payment(
        &self,
        payment_no: &PaymentNo,
        paid_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<PaymentSnapshot, EconomyError> {
        let payment = self.payment(payment_no)?;
        match payment.complete(paid_at, now) {
            Ok(Completion::Applied { user_id, points }) => {
                let account = self.account(&user_id)?;
                let balance = account.credit(
                    points,
                    EntryKind::Credit,
                    None,
                    &format!("payment {payment_no}"),
                    now,
                    &self.journal,
                )?;
                info!(
                    "payment completed - no: {payment_no}, user: {user_id}, \
                     points: {points}, balance: {balance}"
                );
            }
            Ok(Completion::AlreadyPaid) => {
                debug!("payment confirmation redelivered - no: {payment_no}");
            }
            Err(e) => {
                warn!("payment completion rejected - no: {payment_no}: {e}");
                return Err(e);
            }
        }
        Ok(payment.snapshot())
    }

    /// Marks a pending payment as failed. No ledger effect.
    pub fn fail_payment(
        &self,
        payment_no: &PaymentNo,
        reason: &str,
    ) -> Result<PaymentSnapshot, EconomyError> {
        let payment = self.payment(payment_no)?;
        let snapshot = payment.fail(reason)?;
        info!("payment failed - no: {payment_no}, reason: {reason}");
        Ok(snapshot)
    }

    /// Expires every pending payment past its validity window.
    ///
    /// The lazy check in [`Engine::complete_payment`] already protects the
    /// ledger; this sweep exists so abandoned payments reach a terminal
    /// state. Returns the references that expired.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PaymentNo> {
        let mut expired = Vec::new();
        for entry in self.payments.iter() {
            if entry.value().expire_if_stale(now) {
                expired.push(entry.key().clone());
            }
        }
        if !expired.is_empty() {
            info!("payments expired by sweep - count: {}", expired.len());
        }
        expired
    }

    /// Retrieves a payment snapshot by reference.
    pub fn get_payment(&self, payment_no: &PaymentNo) -> Option<PaymentSnapshot> {
        debug!("payment lookup - no: {payment_no}");
        self.payments.get(payment_no).map(|entry| entry.snapshot())
    }

    fn payment(&self, payment_no: &PaymentNo) -> Result<Arc<Payment>, EconomyError> {
        self.payments
            .get(payment_no)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EconomyError::PaymentNotFound)
    }

    // === Referrals ===

    /// Resolves a referral code to its owner.
    pub fn resolve_referrer(&self, code: &str) -> Option<UserId> {
        self.codes.get(code).map(|entry| *entry.value())
    }

    /// Credits a referral bonus to `referrer_id` for bringing in
    /// `subject_id`, subject to the anti-abuse policy.
    ///
    /// Denials (self-referral, protected attribution, spent daily cap) are
    /// reported in the returned [`ReferralOutcome`], not as errors. On
    /// success the bonus credit, the referrer's daily pool update, and the
    /// subject's attribution commit inside one two-account critical
    /// section; the locks are taken in ascending user-id order.
    pub fn credit_referral(
        &self,
        referrer_id: UserId,
        subject_id: UserId,
        is_new_user: bool,
        now: DateTime<Utc>,
    ) -> Result<ReferralOutcome, EconomyError> {
        if referrer_id == subject_id {
            warn!("self referral rejected - user: {referrer_id}");
            return Ok(ReferralOutcome::denied(ReferralDenial::SelfReferral));
        }

        let referrer = self.account(&referrer_id)?;
        let subject = self.account(&subject_id)?;

        // Fixed lock order by user id; a concurrent mirror-image attempt
        // takes the same locks in the same order.
        let (mut referrer_data, mut subject_data);
        if referrer_id < subject_id {
            referrer_data = referrer.lock();
            subject_data = subject.lock();
        } else {
            subject_data = subject.lock();
            referrer_data = referrer.lock();
        }

        if !is_new_user {
            if let Some(existing) = subject_data.referred_by() {
                let age_days = now
                    .signed_duration_since(subject_data.created_at())
                    .num_days();
                if existing != referrer_id && age_days <= ATTRIBUTION_WINDOW_DAYS {
                    info!(
                        "referral rejected, attribution protected - subject: {subject_id}, \
                         held by: {existing}, age days: {age_days}"
                    );
                    return Ok(ReferralOutcome::denied(
                        ReferralDenial::AttributionWindowActive,
                    ));
                }
            }
        }

        let bonus = if is_new_user {
            NEW_USER_BONUS
        } else {
            EXISTING_USER_BONUS
        };
        let award = referrer_data.take_from_daily_pool(bonus, now.date_naive(), DAILY_LIMIT);
        if award == 0 {
            info!("referral rejected, daily cap spent - referrer: {referrer_id}");
            return Ok(ReferralOutcome::denied(ReferralDenial::DailyCapReached));
        }

        // Award validated positive by the pool; the credit cannot fail.
        referrer_data.credit(award)?;
        self.journal.append(LedgerEntry {
            user_id: referrer_id,
            kind: EntryKind::ReferralBonus,
            delta: award,
            related_user: Some(subject_id),
            reason: format!("referral bonus - subject {subject_id}"),
            at: now,
        });
        subject_data.attribute(referrer_id, now);

        info!(
            "referral credited - referrer: {referrer_id}, subject: {subject_id}, \
             awarded: {award} of {bonus}"
        );
        Ok(ReferralOutcome::awarded(award))
    }

    /// Resolves `code`, gets or creates the subject account, and credits the
    /// referral. The convenience entry point for chat frontends.
    pub fn process_referral(
        &self,
        code: &str,
        subject_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ReferralOutcome, EconomyError> {
        let Some(referrer_id) = self.resolve_referrer(code) else {
            warn!("referral code unknown - code: {code}");
            return Ok(ReferralOutcome::denied(ReferralDenial::UnknownCode));
        };
        if referrer_id == subject_id {
            warn!("self referral rejected - user: {referrer_id}");
            return Ok(ReferralOutcome::denied(ReferralDenial::SelfReferral));
        }
        let (_, created) = self.get_or_create_user(subject_id, now)?;
        self.credit_referral(referrer_id, subject_id, created, now)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
