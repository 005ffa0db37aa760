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

//! Error types for economy operations.
//!
//! Every variant here is a recoverable business failure: the operation left
//! all balances, orders, and payments untouched. Referral denials are not
//! errors at all; they come back as [`crate::ReferralOutcome`] values.

use thiserror::Error;

/// Economy operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit would exceed the current points balance
    #[error("insufficient points balance")]
    InsufficientFunds,

    /// Unknown points package key
    #[error("unknown points package")]
    InvalidPackage,

    /// Illegal state-machine move (backward, repeated, or from a terminal state)
    #[error("illegal status transition")]
    InvalidTransition,

    /// Pending payment observed past its validity window
    #[error("payment expired")]
    PaymentExpired,

    /// No account exists for the given user key
    #[error("user not found")]
    UserNotFound,

    /// No order exists for the given reference
    #[error("order not found")]
    OrderNotFound,

    /// No payment exists for the given reference
    #[error("payment not found")]
    PaymentNotFound,

    /// Reference generation kept colliding with registered references
    #[error("could not allocate a unique reference")]
    ReferenceExhausted,
}

#[cfg(test)]
mod tests {
    use super::EconomyError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            EconomyError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            EconomyError::InsufficientFunds.to_string(),
            "insufficient points balance"
        );
        assert_eq!(
            EconomyError::InvalidPackage.to_string(),
            "unknown points package"
        );
        assert_eq!(
            EconomyError::InvalidTransition.to_string(),
            "illegal status transition"
        );
        assert_eq!(EconomyError::PaymentExpired.to_string(), "payment expired");
        assert_eq!(EconomyError::UserNotFound.to_string(), "user not found");
        assert_eq!(EconomyError::OrderNotFound.to_string(), "order not found");
        assert_eq!(
            EconomyError::PaymentNotFound.to_string(),
            "payment not found"
        );
        assert_eq!(
            EconomyError::ReferenceExhausted.to_string(),
            "could not allocate a unique reference"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = EconomyError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
