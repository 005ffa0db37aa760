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

//! # Points Engine
//!
//! This library provides the points economy behind a conversational
//! content-generation service: users spend points on generation orders,
//! buy points through payments, and earn bonus points by referring others.
//!
//! ## Core Components
//!
//! - [`Engine`]: single authority over balances and the order, payment, and
//!   referral lifecycles
//! - [`UserAccount`]: per-user balance, tier, and referral state
//! - [`Journal`]: append-only audit log of every balance change
//! - [`EconomyError`]: typed failures for economy operations
//!
//! ## Example
//!
//! ```
//! use points_engine_rs::{Engine, OrderKind, UserId};
//! use chrono::Utc;
//!
//! let engine = Engine::new();
//! let now = Utc::now();
//!
//! // First contact creates the account.
//! let (user, created) = engine.get_or_create_user(UserId(1), now).unwrap();
//! assert!(created);
//! assert_eq!(user.points, 0);
//!
//! // Credit points, then spend them on an image order.
//! engine.credit(UserId(1), 100, "signup gift", now).unwrap();
//! let order = engine
//!     .create_order(UserId(1), OrderKind::Image, 5, now)
//!     .unwrap();
//! assert_eq!(engine.balance(&UserId(1)).unwrap(), 95);
//! assert_eq!(engine.journal().entry_count(&UserId(1)), 2);
//! # let _ = order;
//! ```
//!
//! ## Thread Safety
//!
//! The engine is shared-reference friendly: many request handlers can drive
//! it concurrently. Per-user mutation is serialized by an account lock held
//! for the whole read-modify-write, including the journal append.

pub mod base;
mod engine;
pub mod error;
pub mod ledger;
pub mod order;
pub mod payment;
pub mod referral;
mod tier;
pub mod user;

pub use base::{OrderNo, PaymentNo, ReferralCode, UserId};
pub use engine::Engine;
pub use error::EconomyError;
pub use ledger::{EntryKind, Journal, LedgerEntry};
pub use order::{Order, OrderKind, OrderSnapshot, OrderStatus, OrderTransition};
pub use payment::{
    POINTS_PACKAGES, Payment, PaymentMethod, PaymentSnapshot, PaymentStatus, PointsPackage,
    find_package,
};
pub use referral::{
    ATTRIBUTION_WINDOW_DAYS, DAILY_LIMIT, EXISTING_USER_BONUS, NEW_USER_BONUS, ReferralDenial,
    ReferralOutcome, build_referral_link,
};
pub use tier::Tier;
pub use user::{UserAccount, UserSnapshot};
