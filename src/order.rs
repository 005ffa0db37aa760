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

//! Generation orders.
//!
//! Implemented State Machine
//!
//  Pending ──► Processing ──► Completed
//      │            │
//      │            └───────► Failed
//      └─── (skip-forward to Completed / Failed is also legal)
//
//! An order only exists after its cost was charged; the cost is fixed at
//! creation. Completing attaches the kind-appropriate result reference,
//! failing records the collaborator's error detail. A failed order does not
//! refund its charge; a refund is an explicit separate credit.

use crate::base::{OrderNo, UserId};
use crate::error::EconomyError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a generation order produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Image,
    Video,
}

impl OrderKind {
    /// Reference point cost for one generation of this kind.
    pub const fn default_cost(self) -> i64 {
        match self {
            OrderKind::Image => 5,
            OrderKind::Video => 20,
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Image => write!(f, "image"),
            OrderKind::Video => write!(f, "video"),
        }
    }
}

/// Order fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Completed | OrderStatus::Failed => 2,
        }
    }

    /// Forward-only moves; terminal states accept nothing.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// A fulfillment report applied to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTransition {
    /// The generation backend picked the order up.
    Started,
    /// Generation finished; carries the result reference.
    Completed { result_url: String },
    /// Generation failed; carries the collaborator's error detail.
    Failed { error: String },
}

impl OrderTransition {
    pub fn target_status(&self) -> OrderStatus {
        match self {
            OrderTransition::Started => OrderStatus::Processing,
            OrderTransition::Completed { .. } => OrderStatus::Completed,
            OrderTransition::Failed { .. } => OrderStatus::Failed,
        }
    }
}

#[derive(Debug)]
struct OrderData {
    order_no: OrderNo,
    user_id: UserId,
    kind: OrderKind,
    status: OrderStatus,
    /// Points already charged; never revised.
    points_cost: i64,
    image_url: Option<String>,
    video_url: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderData {
    fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            order_no: self.order_no.clone(),
            user_id: self.user_id,
            kind: self.kind,
            status: self.status,
            points_cost: self.points_cost,
            image_url: self.image_url.clone(),
            video_url: self.video_url.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time view of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSnapshot {
    pub order_no: OrderNo,
    pub user_id: UserId,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub points_cost: i64,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A generation order with its fulfillment state.
#[derive(Debug)]
pub struct Order {
    inner: Mutex<OrderData>,
}

impl Order {
    pub fn new(
        order_no: OrderNo,
        user_id: UserId,
        kind: OrderKind,
        points_cost: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Mutex::new(OrderData {
                order_no,
                user_id,
                kind,
                status: OrderStatus::Pending,
                points_cost,
                image_url: None,
                video_url: None,
                error: None,
                created_at,
                updated_at: created_at,
            }),
        }
    }

    pub fn status(&self) -> OrderStatus {
        self.inner.lock().status
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        self.inner.lock().snapshot()
    }

    /// Applies a fulfillment report.
    ///
    /// Rejects backward, repeated, and from-terminal moves with
    /// [`EconomyError::InvalidTransition`], leaving the order untouched.
    pub fn apply(
        &self,
        transition: OrderTransition,
        now: DateTime<Utc>,
    ) -> Result<OrderSnapshot, EconomyError> {
        let mut data = self.inner.lock();
        let next = transition.target_status();
        if !data.status.can_advance_to(next) {
            return Err(EconomyError::InvalidTransition);
        }
        match transition {
            OrderTransition::Started => {}
            OrderTransition::Completed { result_url } => match data.kind {
                OrderKind::Image => data.image_url = Some(result_url),
                OrderKind::Video => data.video_url = Some(result_url),
            },
            OrderTransition::Failed { error } => data.error = Some(error),
        }
        data.status = next;
        data.updated_at = now;
        Ok(data.snapshot())
    }
}
