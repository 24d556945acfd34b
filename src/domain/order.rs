use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::account::Points;
use super::luhn;
use super::user::UserId;
use crate::error::LoyaltyError;

/// A purchase-order number that has passed the Luhn check.
///
/// The only way to build one is through [`OrderNumber::parse`], so holding an
/// `OrderNumber` means the checksum has already been verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(raw: &str) -> Result<Self, LoyaltyError> {
        if luhn::validate(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(LoyaltyError::ValidationError(format!(
                "Invalid order number format: {raw:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderNumber {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = LoyaltyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Invalid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final verdict of the accrual authority on an order.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TerminalStatus {
    Processed,
    Invalid,
}

impl From<TerminalStatus> for OrderStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Processed => Self::Processed,
            TerminalStatus::Invalid => Self::Invalid,
        }
    }
}

/// A submitted order and its position in the accrual lifecycle.
///
/// Status moves `NEW -> PROCESSING -> {PROCESSED, INVALID}` and never leaves a
/// terminal state. The transition methods return `false` instead of mutating
/// when the order is already terminal, which lets stores implement the
/// conditional writes the reconciler relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: OrderNumber,
    /// The user who first submitted this number. Never changes.
    pub user_id: UserId,
    pub status: OrderStatus,
    /// Accrued points. Zero unless `status` is `PROCESSED`.
    pub accrual: Points,
    pub uploaded_at: DateTime<Utc>,
    /// Last time the reconciler picked the order up for a query.
    pub polled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(number: OrderNumber, user_id: UserId, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            number,
            user_id,
            status: OrderStatus::New,
            accrual: Points::ZERO,
            uploaded_at,
            polled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Marks the order in flight ahead of an accrual query.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = OrderStatus::Processing;
        self.polled_at = Some(now);
        true
    }

    /// Writes the terminal verdict. An `INVALID` order never carries points.
    pub fn settle(&mut self, status: TerminalStatus, accrual: Points) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status.into();
        self.accrual = match status {
            TerminalStatus::Processed => accrual,
            TerminalStatus::Invalid => Points::ZERO,
        };
        true
    }

    /// Accrual as shown to the owner: only present once the order is processed.
    pub fn visible_accrual(&self) -> Option<Points> {
        (self.status == OrderStatus::Processed).then_some(self.accrual)
    }
}

/// Read model of an order for listing back to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub number: OrderNumber,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            accrual: order.visible_accrual(),
            number: order.number,
            status: order.status,
            uploaded_at: order.uploaded_at,
        }
    }
}
