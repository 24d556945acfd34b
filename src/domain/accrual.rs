//! Contract with the external accrual authority.
//!
//! [`AccrualReply`] is what a transport adapter decodes from the wire;
//! [`AccrualOutcome`] is what the reconciler acts on after the client has
//! applied the lifecycle mapping and the global cooldown.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::account::Points;
use super::order::TerminalStatus;

/// Status vocabulary of the accrual authority.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

/// A decoded response from the accrual authority.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualReply {
    /// The authority knows the order.
    Status {
        order: String,
        status: AccrualStatus,
        accrual: Option<Decimal>,
    },
    /// The authority has no record of the order yet.
    NoContent,
    /// Too many requests. `retry_after` is absent when the authority did not
    /// say how long to wait.
    RateLimited { retry_after: Option<Duration> },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccrualError {
    #[error("accrual transport failed: {0}")]
    Transport(String),
    #[error("accrual query timed out: {0}")]
    Timeout(String),
    #[error("accrual authority returned status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
    #[error("accrual response decode failed: {0}")]
    Decode(String),
}

/// What the reconciler should do with an order after one query.
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualOutcome {
    /// Terminal verdict, to be written to the order.
    Settled {
        status: TerminalStatus,
        accrual: Points,
    },
    /// Not decided yet; ask again on a later tick.
    NotYetKnown,
    /// Every query to the authority must pause for this long.
    RateLimited(Duration),
    /// The query failed; the order is left as it is.
    Failure(AccrualError),
}
