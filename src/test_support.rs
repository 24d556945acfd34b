//! Shared test doubles for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::accrual::{AccrualError, AccrualReply};
use crate::domain::order::OrderNumber;
use crate::domain::ports::AccrualSource;

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => panic!("failed to convert Duration to TimeDelta: {error}"),
        };
        *self.0.lock().unwrap() += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Replays queued replies in order, then repeats `fallback` forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<AccrualReply, AccrualError>>>,
    fallback: Result<AccrualReply, AccrualError>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(fallback: Result<AccrualReply, AccrualError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn then(self, reply: Result<AccrualReply, AccrualError>) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualSource for ScriptedSource {
    async fn fetch(&self, _number: &OrderNumber) -> Result<AccrualReply, AccrualError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
