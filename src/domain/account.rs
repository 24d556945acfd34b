use crate::error::LoyaltyError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::order::{Order, OrderNumber, OrderStatus};
use super::user::UserId;

/// A quantity of loyalty points.
///
/// This is a wrapper around `rust_decimal::Decimal` so that point arithmetic
/// never goes through floating point and stays distinct from raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Points(pub Decimal);

/// Represents a positive amount requested for withdrawal.
///
/// Ensures that withdrawal amounts are always positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LoyaltyError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LoyaltyError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LoyaltyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Points {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Points {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Sums `points`, or `None` if the total does not fit a `Decimal`.
    pub fn checked_sum(points: impl IntoIterator<Item = Self>) -> Option<Self> {
        points
            .into_iter()
            .try_fold(Self::ZERO, |total, p| total.checked_add(p))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.normalize().fmt(f)
    }
}

/// A committed debit against a user's points.
///
/// Withdrawals are append-only: once stored they are never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub user_id: UserId,
    /// Order the points are spent on. It only has to pass the checksum; it
    /// need not be an order tracked by this service.
    pub order: OrderNumber,
    pub sum: Amount,
    pub processed_at: DateTime<Utc>,
}

/// A user's balance, derived from processed orders and withdrawals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Balance {
    /// Points available for withdrawal.
    pub current: Points,
    /// Points withdrawn over the lifetime of the account.
    pub withdrawn: Points,
}

impl Balance {
    /// Derives the balance of `user` from the full order and withdrawal sets.
    ///
    /// Records belonging to other users are ignored, so callers may pass
    /// unfiltered iterators.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticOverflow` if a total does not fit a `Decimal`.
    pub fn derive<'a>(
        user: UserId,
        orders: impl IntoIterator<Item = &'a Order>,
        withdrawals: impl IntoIterator<Item = &'a Withdrawal>,
    ) -> Result<Self, LoyaltyError> {
        let overflow = || LoyaltyError::ArithmeticOverflow(format!("balance of user {user}"));

        let accrued = Points::checked_sum(
            orders
                .into_iter()
                .filter(|o| o.user_id == user && o.status == OrderStatus::Processed)
                .map(|o| o.accrual),
        )
        .ok_or_else(overflow)?;
        let withdrawn = Points::checked_sum(
            withdrawals
                .into_iter()
                .filter(|w| w.user_id == user)
                .map(|w| Points::from(w.sum)),
        )
        .ok_or_else(overflow)?;

        Ok(Self {
            current: accrued.checked_sub(withdrawn).ok_or_else(overflow)?,
            withdrawn,
        })
    }

    /// Checks whether `amount` can be debited from the current balance.
    pub fn can_cover(&self, amount: Amount) -> bool {
        self.current >= Points::from(amount)
    }
}

/// Result of an atomic withdrawal attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawOutcome {
    Committed,
    InsufficientFunds { available: Points },
}
