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

//! Core identifier types for users, orders, payments, and referral codes.
//!
//! Order and payment references are opaque strings. The generators here are
//! random and therefore collision-prone; uniqueness is enforced where the
//! reference is registered (the engine retries on a clash rather than
//! assuming the generator is collision-free).

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable external key for a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally unique reference for a generation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OrderNo(pub String);

impl fmt::Display for OrderNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally unique reference for a payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PaymentNo(pub String);

impl fmt::Display for PaymentNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user's share code, assigned once at account creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ReferralCode(pub String);

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Referral codes are 8 characters from `A-Z0-9`.
pub const REFERRAL_CODE_LEN: usize = 8;

const REFERENCE_RANDOM_DIGITS: usize = 10;
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Builds a reference string: a UTC second-resolution timestamp followed by
/// ten random digits.
pub(crate) fn generate_reference(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let mut reference = now.format("%Y%m%d%H%M%S").to_string();
    for _ in 0..REFERENCE_RANDOM_DIGITS {
        reference.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    reference
}

/// Draws a candidate referral code.
pub(crate) fn generate_referral_code() -> ReferralCode {
    let mut rng = rand::thread_rng();
    let code = (0..REFERRAL_CODE_LEN)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect();
    ReferralCode(code)
}
