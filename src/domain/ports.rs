use super::accrual::{AccrualError, AccrualReply};
use super::account::{Balance, Points, Withdrawal, WithdrawOutcome};
use super::order::{Order, OrderNumber, TerminalStatus};
use super::user::{User, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;

/// Result of inserting an order under its unique number.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// The number was already taken; carries the record that holds it.
    Exists(Order),
}

/// Durable record of orders keyed by their globally unique number.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts `order` unless its number already exists. Must be atomic with
    /// respect to concurrent inserts of the same number.
    async fn insert(&self, order: Order) -> Result<InsertOutcome>;
    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>>;
    /// Orders owned by `user`, newest first.
    async fn list_for_user(&self, user: UserId) -> Result<Vec<Order>>;
    /// Up to `limit` orders in `NEW` or `PROCESSING`, least recently polled
    /// first, never-polled orders ahead of all others.
    async fn pending(&self, limit: usize) -> Result<Vec<Order>>;
    /// Moves a non-terminal order to `PROCESSING` and stamps its poll time.
    /// Returns `false` (and changes nothing) if the order is missing or
    /// already terminal.
    async fn mark_processing(&self, number: &OrderNumber, now: DateTime<Utc>) -> Result<bool>;
    /// Writes the terminal verdict unless the order is already terminal.
    async fn settle(
        &self,
        number: &OrderNumber,
        status: TerminalStatus,
        accrual: Points,
    ) -> Result<bool>;
}

/// Append-only withdrawal ledger. Balances are derived from it together with
/// the processed orders of the same backend.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn balance(&self, user: UserId) -> Result<Balance>;
    /// Checks the balance and appends the withdrawal as one atomic unit.
    async fn withdraw(&self, withdrawal: Withdrawal) -> Result<WithdrawOutcome>;
    /// Withdrawals of `user`, newest first.
    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns `false` if the login is already taken.
    async fn create_user(&self, user: User) -> Result<bool>;
    async fn user_by_login(&self, login: &str) -> Result<Option<User>>;
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>>;
}

/// Raw query protocol of the accrual authority.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn fetch(&self, number: &OrderNumber) -> std::result::Result<AccrualReply, AccrualError>;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type UserStoreRef = Arc<dyn UserStore>;
pub type AccrualSourceRef = Arc<dyn AccrualSource>;
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// One storage backend seen through each of its ports.
///
/// Orders and the ledger must share a backend because balances are derived
/// from both, so the bundle is always built from a single store.
#[derive(Clone)]
pub struct Stores {
    pub orders: OrderStoreRef,
    pub ledger: LedgerStoreRef,
    pub users: UserStoreRef,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: OrderStore + LedgerStore + UserStore + 'static,
    {
        Self {
            orders: backend.clone(),
            ledger: backend.clone(),
            users: backend,
        }
    }
}
