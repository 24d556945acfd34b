use crate::domain::account::{Balance, Points, WithdrawOutcome, Withdrawal};
use crate::domain::order::{Order, OrderNumber, TerminalStatus};
use crate::domain::ports::{InsertOutcome, LedgerStore, OrderStore, UserStore};
use crate::domain::user::{User, UserId};
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for user records, keyed by user id.
pub const CF_USERS: &str = "users";
/// Column Family mapping logins to user ids.
pub const CF_LOGINS: &str = "logins";
/// Column Family for orders, keyed by order number.
pub const CF_ORDERS: &str = "orders";
/// Index Column Family: `user id ++ order number` with empty values.
pub const CF_USER_ORDERS: &str = "user_orders";
/// Column Family for withdrawals: `user id ++ timestamp ++ uuid`.
pub const CF_WITHDRAWALS: &str = "withdrawals";
/// Index Column Family of non-terminal orders in reconciliation order:
/// `polled flag ++ polled_at ++ uploaded_at ++ order number`, empty values.
pub const CF_PENDING: &str = "pending";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_USERS,
    CF_LOGINS,
    CF_ORDERS,
    CF_USER_ORDERS,
    CF_WITHDRAWALS,
    CF_PENDING,
];

/// Offset of the order number inside a `CF_PENDING` key.
const PENDING_NUMBER_OFFSET: usize = 1 + 8 + 8;

/// A persistent store implementation using RocksDB.
///
/// Every record type lives in its own Column Family. Writes that must be
/// atomic with a preceding read (unique inserts, conditional transitions,
/// balance-checked withdrawals) are serialized through `write_lock` and
/// committed with a single `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LoyaltyError::storage(format!("{name} column family not found"))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_pinned_cf(handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Collects the raw `(key, value)` pairs whose key starts with `prefix`.
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let handle = self.cf(cf)?;
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn user_orders(&self, user: UserId) -> Result<Vec<Order>> {
        let prefix = user.as_bytes();
        let mut orders = Vec::new();
        for (key, _) in self.scan_prefix(CF_USER_ORDERS, prefix)? {
            if let Some(order) = self.read::<Order>(CF_ORDERS, &key[prefix.len()..])? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    fn user_withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>> {
        self.scan_prefix(CF_WITHDRAWALS, user.as_bytes())?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(LoyaltyError::from))
            .collect()
    }

    /// Applies `apply` to a stored order and writes it back if it changed,
    /// moving its `CF_PENDING` entry in the same batch.
    async fn transition(
        &self,
        number: &OrderNumber,
        apply: impl FnOnce(&mut Order) -> bool + Send,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut order) = self.read::<Order>(CF_ORDERS, number.as_str())? else {
            return Ok(false);
        };
        let before = pending_key(&order);
        if !apply(&mut order) {
            return Ok(false);
        }

        let orders = self.cf(CF_ORDERS)?;
        let pending = self.cf(CF_PENDING)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(orders, number.as_str(), serde_json::to_vec(&order)?);
        batch.delete_cf(pending, before);
        if !order.is_terminal() {
            batch.put_cf(pending, pending_key(&order), b"");
        }
        self.db.write(batch)?;
        Ok(true)
    }
}

fn user_order_key(user: UserId, number: &OrderNumber) -> Vec<u8> {
    let mut key = user.as_bytes().to_vec();
    key.extend_from_slice(number.as_str().as_bytes());
    key
}

fn withdrawal_key(withdrawal: &Withdrawal) -> Vec<u8> {
    let mut key = withdrawal.user_id.as_bytes().to_vec();
    key.extend_from_slice(&sortable_micros(withdrawal.processed_at));
    key.extend_from_slice(Uuid::new_v4().as_bytes());
    key
}

/// Never-polled orders sort first, then by `polled_at`, then `uploaded_at`.
fn pending_key(order: &Order) -> Vec<u8> {
    let mut key = Vec::with_capacity(PENDING_NUMBER_OFFSET + order.number.as_str().len());
    match order.polled_at {
        None => key.extend_from_slice(&[0; 9]),
        Some(polled_at) => {
            key.push(1);
            key.extend_from_slice(&sortable_micros(polled_at));
        }
    }
    key.extend_from_slice(&sortable_micros(order.uploaded_at));
    key.extend_from_slice(order.number.as_str().as_bytes());
    key
}

fn sortable_micros(at: DateTime<Utc>) -> [u8; 8] {
    // Flipping the sign bit keeps big-endian byte order equal to numeric order.
    (at.timestamp_micros() as u64 ^ (1 << 63)).to_be_bytes()
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn insert(&self, order: Order) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read::<Order>(CF_ORDERS, order.number.as_str())? {
            return Ok(InsertOutcome::Exists(existing));
        }

        let orders = self.cf(CF_ORDERS)?;
        let index = self.cf(CF_USER_ORDERS)?;
        let pending = self.cf(CF_PENDING)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(orders, order.number.as_str(), serde_json::to_vec(&order)?);
        batch.put_cf(index, user_order_key(order.user_id, &order.number), b"");
        if !order.is_terminal() {
            batch.put_cf(pending, pending_key(&order), b"");
        }
        self.db.write(batch)?;

        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>> {
        self.read(CF_ORDERS, number.as_str())
    }

    async fn list_for_user(&self, user: UserId) -> Result<Vec<Order>> {
        let mut orders = self.user_orders(user)?;
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Order>> {
        let handle = self.cf(CF_PENDING)?;
        let mut pending = Vec::new();
        for item in self
            .db
            .iterator_cf(handle, IteratorMode::Start)
            .take(limit)
        {
            let (key, _) = item?;
            if let Some(order) = self.read::<Order>(CF_ORDERS, &key[PENDING_NUMBER_OFFSET..])? {
                pending.push(order);
            }
        }
        Ok(pending)
    }

    async fn mark_processing(&self, number: &OrderNumber, now: DateTime<Utc>) -> Result<bool> {
        self.transition(number, |order| order.begin_processing(now))
            .await
    }

    async fn settle(
        &self,
        number: &OrderNumber,
        status: TerminalStatus,
        accrual: Points,
    ) -> Result<bool> {
        self.transition(number, |order| order.settle(status, accrual))
            .await
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn balance(&self, user: UserId) -> Result<Balance> {
        let orders = self.user_orders(user)?;
        let withdrawals = self.user_withdrawals(user)?;
        Balance::derive(user, &orders, &withdrawals)
    }

    async fn withdraw(&self, withdrawal: Withdrawal) -> Result<WithdrawOutcome> {
        let _guard = self.write_lock.lock().await;
        let user = withdrawal.user_id;
        let orders = self.user_orders(user)?;
        let existing = self.user_withdrawals(user)?;
        let balance = Balance::derive(user, &orders, &existing)?;
        if !balance.can_cover(withdrawal.sum) {
            return Ok(WithdrawOutcome::InsufficientFunds {
                available: balance.current,
            });
        }

        let handle = self.cf(CF_WITHDRAWALS)?;
        self.db.put_cf(
            handle,
            withdrawal_key(&withdrawal),
            serde_json::to_vec(&withdrawal)?,
        )?;
        Ok(WithdrawOutcome::Committed)
    }

    async fn withdrawals_for_user(&self, user: UserId) -> Result<Vec<Withdrawal>> {
        // Keys are time-ordered, so reversing the scan yields newest first.
        let mut withdrawals = self.user_withdrawals(user)?;
        withdrawals.reverse();
        Ok(withdrawals)
    }
}

#[async_trait]
impl UserStore for RocksDBStore {
    async fn create_user(&self, user: User) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let logins = self.cf(CF_LOGINS)?;
        if self.db.get_pinned_cf(logins, user.login.as_bytes())?.is_some() {
            return Ok(false);
        }

        let users = self.cf(CF_USERS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(users, user.id.as_bytes(), serde_json::to_vec(&user)?);
        batch.put_cf(logins, user.login.as_bytes(), user.id.as_bytes());
        self.db.write(batch)?;
        Ok(true)
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>> {
        let logins = self.cf(CF_LOGINS)?;
        let Some(id) = self.db.get_pinned_cf(logins, login.as_bytes())? else {
            return Ok(None);
        };
        self.read(CF_USERS, &*id)
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.read(CF_USERS, id.as_bytes())
    }
}
