use rust_decimal::Decimal;
use tracing::{error, info};

use crate::domain::account::{Amount, Balance, WithdrawOutcome, Withdrawal};
use crate::domain::order::{Order, OrderNumber, OrderView};
use crate::domain::ports::{InsertOutcome, LedgerStoreRef, OrderStoreRef, SharedClock, Stores};
use crate::domain::user::UserId;
use crate::error::{LoyaltyError, Result};

/// Outcome of a successful order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The number was new and is now owned by the caller.
    Accepted,
    /// The caller had already submitted this number; nothing changed.
    AlreadyAccepted,
}

/// A list result that keeps "nothing there" distinct from a populated list.
#[derive(Debug, Clone, PartialEq)]
pub enum Listing<T> {
    Empty,
    Items(Vec<T>),
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        if items.is_empty() {
            Self::Empty
        } else {
            Self::Items(items)
        }
    }
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Empty => Vec::new(),
            Self::Items(items) => items,
        }
    }
}

/// The order and balance operations offered to the outer layer.
///
/// `LoyaltyEngine` is thin orchestration over the stores. It owns no mutable
/// state of its own, so one instance can serve any number of concurrent
/// callers; the stores provide the atomicity (unique order numbers,
/// balance-checked withdrawals).
///
/// Every operation takes the acting user explicitly.
#[derive(Clone)]
pub struct LoyaltyEngine {
    orders: OrderStoreRef,
    ledger: LedgerStoreRef,
    clock: SharedClock,
}

impl LoyaltyEngine {
    /// Creates a new `LoyaltyEngine` over one storage backend.
    pub fn new(stores: &Stores, clock: SharedClock) -> Self {
        Self {
            orders: stores.orders.clone(),
            ledger: stores.ledger.clone(),
            clock,
        }
    }

    /// Submits an order number on behalf of `user`.
    ///
    /// Reconciliation happens later in the background; this call only
    /// records the order in `NEW`.
    ///
    /// # Errors
    ///
    /// * `ValidationError` if the number fails the checksum.
    /// * `ConflictError` if another user already owns the number.
    pub async fn submit_order(&self, user: UserId, raw: &str) -> Result<SubmitOutcome> {
        let number = OrderNumber::parse(raw)?;

        if let Some(existing) = self.orders.get(&number).await.map_err(log_storage)? {
            return owner_outcome(&existing, user);
        }

        let order = Order::new(number, user, self.clock.utc());
        match self.orders.insert(order).await.map_err(log_storage)? {
            InsertOutcome::Inserted => {
                info!(order = %raw, %user, "Order accepted");
                Ok(SubmitOutcome::Accepted)
            }
            // Lost a race against a concurrent insert of the same number.
            InsertOutcome::Exists(existing) => owner_outcome(&existing, user),
        }
    }

    /// Orders of `user`, newest first. Accrual is only shown once processed.
    pub async fn orders(&self, user: UserId) -> Result<Listing<OrderView>> {
        let orders = self
            .orders
            .list_for_user(user)
            .await
            .map_err(log_storage)?;
        Ok(orders
            .into_iter()
            .map(OrderView::from)
            .collect::<Vec<_>>()
            .into())
    }

    pub async fn balance(&self, user: UserId) -> Result<Balance> {
        self.ledger.balance(user).await.map_err(log_storage)
    }

    /// Debits `sum` points against `raw_order`.
    ///
    /// The balance check and the debit are one atomic store operation, so
    /// concurrent withdrawals can never overdraw the account.
    ///
    /// # Errors
    ///
    /// * `ValidationError` for a bad order number or a non-positive sum.
    /// * `InsufficientFunds` if the current balance does not cover `sum`.
    pub async fn withdraw(&self, user: UserId, raw_order: &str, sum: Decimal) -> Result<()> {
        let order = OrderNumber::parse(raw_order)?;
        let sum = Amount::new(sum)?;

        let withdrawal = Withdrawal {
            user_id: user,
            order,
            sum,
            processed_at: self.clock.utc(),
        };
        match self.ledger.withdraw(withdrawal).await.map_err(log_storage)? {
            WithdrawOutcome::Committed => {
                info!(%user, order = %raw_order, sum = %sum.value(), "Withdrawal committed");
                Ok(())
            }
            WithdrawOutcome::InsufficientFunds { available } => {
                Err(LoyaltyError::InsufficientFunds {
                    requested: sum.value(),
                    available: available.value(),
                })
            }
        }
    }

    /// Withdrawals of `user`, newest first.
    pub async fn withdrawals(&self, user: UserId) -> Result<Listing<Withdrawal>> {
        let withdrawals = self
            .ledger
            .withdrawals_for_user(user)
            .await
            .map_err(log_storage)?;
        Ok(withdrawals.into())
    }
}

fn owner_outcome(existing: &Order, user: UserId) -> Result<SubmitOutcome> {
    if existing.user_id == user {
        Ok(SubmitOutcome::AlreadyAccepted)
    } else {
        Err(LoyaltyError::ConflictError(format!(
            "Order {} was uploaded by another user",
            existing.number
        )))
    }
}

fn log_storage(e: LoyaltyError) -> LoyaltyError {
    error!(error = %e, "Store operation failed");
    e
}
