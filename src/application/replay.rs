//! Batch replay of user activity through the auth service and the engine.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use super::auth::AuthService;
use super::engine::{LoyaltyEngine, SubmitOutcome};
use crate::domain::account::Balance;
use crate::domain::user::{Credentials, UserId};
use crate::error::{LoyaltyError, Result};

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Register,
    Order,
    Withdraw,
}

/// One replayed row: `type, login, password, order, amount`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Operation {
    #[serde(rename = "type")]
    pub r#type: OperationType,
    pub login: String,
    pub password: String,
    pub order: Option<String>,
    pub amount: Option<Decimal>,
}

/// Applies operations in order, remembering every login that acted.
pub struct ReplaySession<'a> {
    auth: &'a AuthService,
    engine: &'a LoyaltyEngine,
    /// login -> (verified password, user)
    verified: HashMap<String, (String, UserId)>,
    /// Logins in first-seen order.
    seen: Vec<String>,
}

impl<'a> ReplaySession<'a> {
    pub fn new(auth: &'a AuthService, engine: &'a LoyaltyEngine) -> Self {
        Self {
            auth,
            engine,
            verified: HashMap::new(),
            seen: Vec::new(),
        }
    }

    pub async fn apply(&mut self, op: Operation) -> Result<()> {
        let credentials = Credentials::new(op.login, op.password)?;
        match op.r#type {
            OperationType::Register => {
                let token = self.auth.register(credentials.clone()).await?;
                let user = self.auth.current_user(&token).await?;
                self.remember(credentials, user);
            }
            OperationType::Order => {
                let user = self.resolve(credentials).await?;
                let number = required(op.order, "order")?;
                if self.engine.submit_order(user, &number).await? == SubmitOutcome::AlreadyAccepted
                {
                    warn!(order = %number, "Order already accepted, row ignored");
                }
            }
            OperationType::Withdraw => {
                let user = self.resolve(credentials).await?;
                let number = required(op.order, "order")?;
                let amount = required(op.amount, "amount")?;
                self.engine.withdraw(user, &number, amount).await?;
            }
        }
        Ok(())
    }

    /// Final balance of every login that acted, in first-seen order.
    pub async fn balances(&self) -> Result<Vec<(String, Balance)>> {
        let mut balances = Vec::with_capacity(self.seen.len());
        for login in &self.seen {
            let (_, user) = &self.verified[login];
            balances.push((login.clone(), self.engine.balance(*user).await?));
        }
        Ok(balances)
    }

    async fn resolve(&mut self, credentials: Credentials) -> Result<UserId> {
        if let Some((password, user)) = self.verified.get(&credentials.login)
            && *password == credentials.password
        {
            return Ok(*user);
        }
        let token = self.auth.authenticate(credentials.clone()).await?;
        let user = self.auth.current_user(&token).await?;
        self.remember(credentials, user);
        Ok(user)
    }

    fn remember(&mut self, credentials: Credentials, user: UserId) {
        if !self.verified.contains_key(&credentials.login) {
            self.seen.push(credentials.login.clone());
        }
        self.verified
            .insert(credentials.login, (credentials.password, user));
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| LoyaltyError::ValidationError(format!("Missing {field}")))
}
