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

//! Append-only ledger journal.
//!
//! Every balance mutation records exactly one entry; entries are never
//! mutated or removed. Appends happen while the owning user's account lock
//! is held, which is what makes "balance changed" and "entry recorded" a
//! single atomic unit.

use crate::base::UserId;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Kind of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Points removed for an order.
    Charge,
    /// Points added by a payment or a manual grant.
    Credit,
    /// Points added by the referral engine.
    ReferralBonus,
}

/// Immutable audit record of one balance change.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub kind: EntryKind,
    /// Signed point delta; negative for charges.
    pub delta: i64,
    /// Counterparty for referral entries (the referred subject).
    pub related_user: Option<UserId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Concurrent append-only journal.
///
/// A [`SegQueue`] preserves global append order for audit export while a
/// per-user index backs balance reconciliation. Both structures only ever
/// grow; the queue is drained exclusively by [`Journal::drain`].
#[derive(Debug, Default)]
pub struct Journal {
    /// Global feed in append order, consumed by audit export.
    feed: SegQueue<Arc<LedgerEntry>>,
    /// Entries per user, in that user's append order.
    by_user: DashMap<UserId, Vec<Arc<LedgerEntry>>>,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self {
            feed: SegQueue::new(),
            by_user: DashMap::new(),
        }
    }

    /// Appends an entry. Callers hold the owning account's lock.
    pub(crate) fn append(&self, entry: LedgerEntry) {
        let entry = Arc::new(entry);
        self.by_user
            .entry(entry.user_id)
            .or_default()
            .push(Arc::clone(&entry));
        self.feed.push(entry);
    }

    /// Entries recorded for one user, oldest first.
    pub fn entries_for(&self, user_id: &UserId) -> Vec<Arc<LedgerEntry>> {
        self.by_user
            .get(user_id)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of entries recorded for one user.
    pub fn entry_count(&self, user_id: &UserId) -> usize {
        self.by_user
            .get(user_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Net point delta recorded for a user. For an account whose every
    /// mutation went through the engine this equals the current balance.
    pub fn net_delta(&self, user_id: &UserId) -> i64 {
        self.by_user
            .get(user_id)
            .map(|entries| entries.iter().map(|entry| entry.delta).sum())
            .unwrap_or(0)
    }

    /// Total number of entries ever appended, minus any drained.
    pub fn len(&self) -> usize {
        self.feed.len()
    }

    /// True when the global feed holds no entries.
    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }

    /// Removes and returns the global feed in append order.
    ///
    /// The per-user index is untouched, so reconciliation keeps working
    /// after an audit export.
    pub fn drain(&self) -> Vec<Arc<LedgerEntry>> {
        let mut entries = Vec::with_capacity(self.feed.len());
        while let Some(entry) = self.feed.pop() {
            entries.push(entry);
        }
        entries
    }
}
