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

//! Referral policy and outcomes.
//!
//! A denial is an expected business outcome, not an error: callers get a
//! [`ReferralOutcome`] value either way and decide their own messaging.

use crate::base::ReferralCode;
use serde::Serialize;

/// Bonus for bringing in a user the system has never seen.
pub const NEW_USER_BONUS: i64 = 40;

/// Bonus for re-engaging an existing user with no active attribution.
pub const EXISTING_USER_BONUS: i64 = 10;

/// Referral bonus points one referrer can earn per UTC day.
pub const DAILY_LIMIT: i64 = 100;

/// Days an attribution protects the subject from re-attribution, counted
/// from the subject's creation time.
pub const ATTRIBUTION_WINDOW_DAYS: i64 = 7;

/// Why a referral attempt earned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralDenial {
    /// No user owns the presented code.
    UnknownCode,
    /// The referrer presented their own code.
    SelfReferral,
    /// The subject is attributed to a different referrer inside the window.
    AttributionWindowActive,
    /// The referrer's daily pool is already spent.
    DailyCapReached,
}

/// Result of a referral attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferralOutcome {
    pub succeeded: bool,
    /// Points actually credited; may be less than the nominal bonus when the
    /// daily pool only partially covers it.
    pub points_awarded: i64,
    pub denial: Option<ReferralDenial>,
}

impl ReferralOutcome {
    pub(crate) fn awarded(points: i64) -> Self {
        Self {
            succeeded: true,
            points_awarded: points,
            denial: None,
        }
    }

    pub(crate) fn denied(denial: ReferralDenial) -> Self {
        Self {
            succeeded: false,
            points_awarded: 0,
            denial: Some(denial),
        }
    }
}

/// Builds the share link a referrer hands out.
pub fn build_referral_link(bot_username: &str, code: &ReferralCode) -> String {
    format!("https://t.me/{bot_username}?start={code}")
}
