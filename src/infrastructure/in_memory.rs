use crate::domain::account::{Balance, Points, WithdrawOutcome, Withdrawal};
use crate::domain::order::{Order, OrderNumber, TerminalStatus};
use crate::domain::ports::{InsertOutcome, LedgerStore, OrderStore, UserStore};
use crate::domain::user::{User, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    orders: HashMap<OrderNumber, Order>,
    withdrawals: Vec<Withdrawal>,
    users: HashMap<UserId, User>,
    logins: HashMap<String, UserId>,
}

/// A thread-safe in-memory backend for orders, withdrawals and users.
///
/// All three ports share one `Arc<RwLock<_>>`, so every check-then-act
/// operation (unique insert, balance-checked withdrawal) runs under a single
/// write lock. Ideal for tests and for one-shot runs where persistence is
/// not required.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert(&self, order: Order) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        match state.orders.entry(order.number.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Exists(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(number).cloned())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut pending: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect();
        // None sorts before Some, so never-polled orders come first.
        pending.sort_by_key(|o| (o.polled_at, o.uploaded_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processing(&self, number: &OrderNumber, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .orders
            .get_mut(number)
            .is_some_and(|order| order.begin_processing(now)))
    }

    async fn settle(
        &self,
        number: &OrderNumber,
        status: TerminalStatus,
        accrual: Points,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .orders
            .get_mut(number)
            .is_some_and(|order| order.settle(status, accrual)))
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn balance(&self, user: UserId) -> Result<Balance> {
        let state = self.state.read().await;
        Balance::derive(user, state.orders.values(), &state.withdrawals)
    }

    async fn withdraw(&self, withdrawal: Withdrawal) -> Result<WithdrawOutcome> {
        let mut state = self.state.write().await;
        let balance = Balance::derive(
            withdrawal.user_id,
            state.orders.values(),
            &state.withdrawals,
        )?;
        if !balance.can_cover(withdrawal.sum) {
            return Ok(WithdrawOutcome::InsufficientFunds {
                available: balance.current,
            });
        }
        state.withdrawals.push(withdrawal);
        Ok(WithdrawOutcome::Committed)
    }

    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>> {
        let state = self.state.read().await;
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user: User) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.logins.contains_key(&user.login) {
            return Ok(false);
        }
        state.logins.insert(user.login.clone(), user.id);
        state.users.insert(user.id, user);
        Ok(true)
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .logins
            .get(login)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).cloned())
    }
}
