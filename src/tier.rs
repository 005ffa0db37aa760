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

//! Tier derivation.
//!
//! A tier is a pure function of the current points balance against fixed
//! ascending thresholds. A balance sitting exactly on a threshold gets the
//! higher tier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User tier, recomputed after every balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    P1,
    P2,
    P3,
    P4,
    P5,
}

impl Tier {
    /// Derives the tier for a points balance.
    pub fn from_points(points: i64) -> Self {
        if points >= 10_000 {
            Tier::P5
        } else if points >= 5_000 {
            Tier::P4
        } else if points >= 2_000 {
            Tier::P3
        } else if points >= 500 {
            Tier::P2
        } else {
            Tier::P1
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::P1 => "P1",
            Tier::P2 => "P2",
            Tier::P3 => "P3",
            Tier::P4 => "P4",
            Tier::P5 => "P5",
        };
        write!(f, "{name}")
    }
}
