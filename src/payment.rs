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

//! Purchase attempts and the points package table.
//!
//! Implemented State Machine
//!
//  Pending ──► Paid      (credits the ledger, exactly once)
//      │
//      ├─────► Failed    (no ledger effect)
//      └─────► Expired   (validity window elapsed; never payable afterward)
//
//! Package points and prices come from a fixed table keyed by package key;
//! the amount is never client-supplied. Gateways may redeliver confirmation
//! signals, so completion is idempotent per payment.

use crate::base::{PaymentNo, UserId};
use crate::error::EconomyError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Alipay,
    Wechat,
    Usdt,
}

impl PaymentMethod {
    /// How long a pending payment of this method stays collectable.
    pub fn validity_window(self) -> Duration {
        match self {
            // Instant card-style methods confirm fast or not at all.
            PaymentMethod::Alipay | PaymentMethod::Wechat => Duration::minutes(5),
            PaymentMethod::Usdt => Duration::minutes(15),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Alipay => write!(f, "alipay"),
            PaymentMethod::Wechat => write!(f, "wechat"),
            PaymentMethod::Usdt => write!(f, "usdt"),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alipay" => Ok(PaymentMethod::Alipay),
            "wechat" => Ok(PaymentMethod::Wechat),
            "usdt" => Ok(PaymentMethod::Usdt),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// One purchasable points bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsPackage {
    pub key: &'static str,
    pub points: i64,
    pub price: Decimal,
}

/// Fixed package table; keys are what the frontend sends.
pub const POINTS_PACKAGES: [PointsPackage; 4] = [
    PointsPackage {
        key: "20",
        points: 20,
        price: dec!(20.00),
    },
    PointsPackage {
        key: "55",
        points: 55,
        price: dec!(50.00),
    },
    PointsPackage {
        key: "120",
        points: 120,
        price: dec!(100.00),
    },
    PointsPackage {
        key: "250",
        points: 250,
        price: dec!(200.00),
    },
];

/// Looks up a package by key.
pub fn find_package(key: &str) -> Option<&'static PointsPackage> {
    POINTS_PACKAGES.iter().find(|package| package.key == key)
}

/// Outcome of a completion attempt, consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The payment just moved to Paid; the caller owes the ledger credit.
    Applied { user_id: UserId, points: i64 },
    /// Redelivered confirmation for an already-paid payment; nothing to do.
    AlreadyPaid,
}

#[derive(Debug)]
struct PaymentData {
    payment_no: PaymentNo,
    user_id: UserId,
    method: PaymentMethod,
    status: PaymentStatus,
    /// Currency amount from the package table.
    amount: Decimal,
    /// Points credited on confirmation.
    points: i64,
    payment_url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl PaymentData {
    fn deadline(&self) -> DateTime<Utc> {
        self.created_at + self.method.validity_window()
    }

    fn snapshot(&self) -> PaymentSnapshot {
        PaymentSnapshot {
            payment_no: self.payment_no.clone(),
            user_id: self.user_id,
            method: self.method,
            status: self.status,
            amount: self.amount,
            points: self.points,
            payment_url: self.payment_url.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            paid_at: self.paid_at,
        }
    }
}

/// Point-in-time view of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSnapshot {
    pub payment_no: PaymentNo,
    pub user_id: UserId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub points: i64,
    pub payment_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// A purchase attempt.
#[derive(Debug)]
pub struct Payment {
    inner: Mutex<PaymentData>,
}

impl Payment {
    pub fn new(
        payment_no: PaymentNo,
        user_id: UserId,
        package: &PointsPackage,
        method: PaymentMethod,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Mutex::new(PaymentData {
                payment_no,
                user_id,
                method,
                status: PaymentStatus::Pending,
                amount: package.price,
                points: package.points,
                payment_url: None,
                error: None,
                created_at,
                paid_at: None,
            }),
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.lock().status
    }

    pub fn snapshot(&self) -> PaymentSnapshot {
        self.inner.lock().snapshot()
    }

    /// Records the externally obtained redirect URL.
    ///
    /// Re-attaching the same URL is a no-op; replacing it is only legal
    /// while the payment is still pending.
    pub(crate) fn attach_url(&self, url: &str) -> Result<PaymentSnapshot, EconomyError> {
        let mut data = self.inner.lock();
        if data.payment_url.as_deref() == Some(url) {
            return Ok(data.snapshot());
        }
        if data.status != PaymentStatus::Pending {
            return Err(EconomyError::InvalidTransition);
        }
        data.payment_url = Some(url.to_string());
        Ok(data.snapshot())
    }

    /// Attempts the Pending -> Paid transition.
    ///
    /// Expiry is checked lazily here: a pending payment observed past its
    /// deadline flips to Expired and the confirmation is rejected. An
    /// already-paid payment reports [`Completion::AlreadyPaid`] so the
    /// caller never credits twice.
    pub(crate) fn complete(
        &self,
        paid_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Completion, EconomyError> {
        let mut data = self.inner.lock();
        match data.status {
            PaymentStatus::Paid => Ok(Completion::AlreadyPaid),
            PaymentStatus::Pending => {
                if now > data.deadline() {
                    data.status = PaymentStatus::Expired;
                    return Err(EconomyError::PaymentExpired);
                }
                data.status = PaymentStatus::Paid;
                data.paid_at = Some(paid_at);
                Ok(Completion::Applied {
                    user_id: data.user_id,
                    points: data.points,
                })
            }
            PaymentStatus::Failed | PaymentStatus::Expired => {
                Err(EconomyError::InvalidTransition)
            }
        }
    }

    /// Transitions Pending -> Failed. No ledger effect.
    pub(crate) fn fail(&self, reason: &str) -> Result<PaymentSnapshot, EconomyError> {
        let mut data = self.inner.lock();
        if data.status != PaymentStatus::Pending {
            return Err(EconomyError::InvalidTransition);
        }
        data.status = PaymentStatus::Failed;
        data.error = Some(reason.to_string());
        Ok(data.snapshot())
    }

    /// Expires a pending payment past its deadline. Returns true when the
    /// payment transitioned.
    pub(crate) fn expire_if_stale(&self, now: DateTime<Utc>) -> bool {
        let mut data = self.inner.lock();
        if data.status == PaymentStatus::Pending && now > data.deadline() {
            data.status = PaymentStatus::Expired;
            true
        } else {
            false
        }
    }
}
