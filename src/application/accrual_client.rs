use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::account::Points;
use crate::domain::accrual::{AccrualError, AccrualOutcome, AccrualReply, AccrualStatus};
use crate::domain::order::{OrderNumber, TerminalStatus};
use crate::domain::ports::{AccrualSourceRef, SharedClock};

/// Timeouts applied by the [`AccrualClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualClientConfig {
    /// Upper bound on a single query, transport included.
    pub request_timeout: Duration,
    /// Cooldown applied when a rate-limit reply carries no `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for AccrualClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            default_retry_after: Duration::from_secs(60),
        }
    }
}

/// Interprets the accrual authority's replies and owns its global cooldown.
///
/// A rate-limit reply throttles every query, not just the one that received
/// it: until the recorded next-eligible instant has passed, queries return
/// [`AccrualOutcome::RateLimited`] without reaching the source.
pub struct AccrualClient {
    source: AccrualSourceRef,
    clock: SharedClock,
    config: AccrualClientConfig,
    cooldown_until: Mutex<Option<DateTime<Utc>>>,
}

impl AccrualClient {
    pub fn new(source: AccrualSourceRef, clock: SharedClock, config: AccrualClientConfig) -> Self {
        Self {
            source,
            clock,
            config,
            cooldown_until: Mutex::new(None),
        }
    }

    /// Time left before the authority may be queried again, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = (*self.lock_cooldown())?;
        (until - self.clock.utc())
            .to_std()
            .ok()
            .filter(|remaining| !remaining.is_zero())
    }

    /// Queries the authority once for `number`.
    ///
    /// Never fails: every problem is folded into the returned outcome so the
    /// caller can decide whether to retry.
    pub async fn query_accrual(&self, number: &OrderNumber) -> AccrualOutcome {
        if let Some(remaining) = self.cooldown_remaining() {
            return AccrualOutcome::RateLimited(remaining);
        }

        let reply =
            match tokio::time::timeout(self.config.request_timeout, self.source.fetch(number))
                .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(error)) => return AccrualOutcome::Failure(error),
                Err(_) => {
                    return AccrualOutcome::Failure(AccrualError::Timeout(format!(
                        "no reply within {:?}",
                        self.config.request_timeout
                    )));
                }
            };

        match reply {
            AccrualReply::NoContent => AccrualOutcome::NotYetKnown,
            AccrualReply::RateLimited { retry_after } => {
                let wait = retry_after.unwrap_or(self.config.default_retry_after);
                self.start_cooldown(wait);
                warn!(
                    order = %number,
                    retry_after_secs = wait.as_secs(),
                    "Accrual authority is rate limiting"
                );
                AccrualOutcome::RateLimited(wait)
            }
            AccrualReply::Status {
                order,
                status,
                accrual,
            } => {
                if order != number.as_str() {
                    return AccrualOutcome::Failure(AccrualError::Decode(format!(
                        "reply for order {order} while querying {number}"
                    )));
                }
                map_status(status, accrual)
            }
        }
    }

    fn start_cooldown(&self, wait: Duration) {
        let delta = TimeDelta::from_std(wait).unwrap_or(TimeDelta::MAX);
        let until = self
            .clock
            .utc()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut cooldown = self.lock_cooldown();
        // A shorter signal never shortens a cooldown already in force.
        if cooldown.is_none_or(|current| current < until) {
            *cooldown = Some(until);
        }
    }

    fn lock_cooldown(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.cooldown_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn map_status(status: AccrualStatus, accrual: Option<Decimal>) -> AccrualOutcome {
    match status {
        AccrualStatus::Registered | AccrualStatus::Processing => {
            debug!(?status, "Accrual not decided yet");
            AccrualOutcome::NotYetKnown
        }
        AccrualStatus::Invalid => AccrualOutcome::Settled {
            status: TerminalStatus::Invalid,
            accrual: Points::ZERO,
        },
        AccrualStatus::Processed => {
            let amount = accrual.unwrap_or(Decimal::ZERO);
            if amount < Decimal::ZERO {
                return AccrualOutcome::Failure(AccrualError::Decode(format!(
                    "negative accrual {amount}"
                )));
            }
            AccrualOutcome::Settled {
                status: TerminalStatus::Processed,
                accrual: Points::new(amount),
            }
        }
    }
}
