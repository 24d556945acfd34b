use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accrual_client::AccrualClient;
use crate::domain::accrual::AccrualOutcome;
use crate::domain::order::Order;
use crate::domain::ports::{OrderStoreRef, SharedClock};
use crate::error::Result;

/// Cadence and batch bounds of the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub tick_interval: Duration,
    /// Maximum number of candidates examined per tick.
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Candidates fetched from the order store.
    pub examined: usize,
    /// Orders that reached a terminal status during the pass.
    pub settled: usize,
    /// Orders the authority has not decided yet.
    pub pending: usize,
    /// Queries that failed; the orders stay `PROCESSING`.
    pub failed: usize,
    /// Candidates left untouched because of the rate-limit cooldown.
    pub deferred: usize,
    /// The pass did not run because another one was still active.
    pub skipped: bool,
}

/// Background worker that drives non-terminal orders to a terminal status.
///
/// Only one pass runs at a time: a tick that finds the previous pass still
/// active is skipped, not queued. The same interlock serializes access to the
/// accrual client's cooldown.
pub struct Reconciler {
    orders: OrderStoreRef,
    accrual: Arc<AccrualClient>,
    clock: SharedClock,
    config: ReconcilerConfig,
    busy: AtomicBool,
}

/// Clears the busy flag when a pass ends, including by cancellation.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        orders: OrderStoreRef,
        accrual: Arc<AccrualClient>,
        clock: SharedClock,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            orders,
            accrual,
            clock,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Runs one reconciliation pass over a batch of candidates.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the order store fails; orders already
    /// advanced in this pass keep their new state.
    pub async fn run_tick(&self) -> Result<TickReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous reconciliation pass still running, skipping tick");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        }
        let _guard = PassGuard(&self.busy);

        let candidates = self.orders.pending(self.config.batch_size).await?;
        let mut report = TickReport {
            examined: candidates.len(),
            ..TickReport::default()
        };

        for (index, order) in candidates.iter().enumerate() {
            if let Some(remaining) = self.accrual.cooldown_remaining() {
                report.deferred = candidates.len() - index;
                debug!(
                    deferred = report.deferred,
                    retry_after_secs = remaining.as_secs(),
                    "Accrual cooldown active, deferring rest of batch"
                );
                break;
            }

            if !self.step(order, &mut report).await? {
                report.deferred = candidates.len() - index - 1;
                break;
            }
        }

        Ok(report)
    }

    /// Advances one order. Returns `false` when the rest of the batch must
    /// wait for the authority's cooldown.
    async fn step(&self, order: &Order, report: &mut TickReport) -> Result<bool> {
        let number = &order.number;
        if !self
            .orders
            .mark_processing(number, self.clock.utc())
            .await?
        {
            // Settled since the batch was read.
            return Ok(true);
        }

        match self.accrual.query_accrual(number).await {
            AccrualOutcome::Settled { status, accrual } => {
                if self.orders.settle(number, status, accrual).await? {
                    report.settled += 1;
                    info!(order = %number, user = %order.user_id, ?status, %accrual, "Order settled");
                }
                Ok(true)
            }
            AccrualOutcome::NotYetKnown => {
                report.pending += 1;
                debug!(order = %number, "Accrual not known yet");
                Ok(true)
            }
            AccrualOutcome::RateLimited(wait) => {
                report.pending += 1;
                debug!(order = %number, retry_after_secs = wait.as_secs(), "Query rate limited");
                Ok(false)
            }
            AccrualOutcome::Failure(error) => {
                report.failed += 1;
                warn!(order = %number, %error, "Accrual query failed, will retry");
                Ok(true)
            }
        }
    }

    /// Ticks at the configured cadence until `shutdown` is cancelled.
    ///
    /// Cancellation abandons the in-flight pass; at most the order being
    /// queried is left `PROCESSING`, and it stays a candidate.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Reconciler started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.run_tick() => log_tick(result),
            }
        }

        info!("Reconciler stopped");
    }

    /// Starts [`Reconciler::run`] on the runtime and returns its stop handle.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(shutdown.clone()));
        ReconcilerHandle { shutdown, task }
    }

    /// Ticks until no candidates remain or `timeout` elapses.
    ///
    /// Returns `true` if every order reached a terminal status.
    pub async fn run_until_settled(&self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.drain()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Orders still pending after drain timeout");
                Ok(false)
            }
        }
    }

    async fn drain(&self) -> Result<bool> {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if self.orders.pending(1).await?.is_empty() {
                return Ok(true);
            }
            interval.tick().await;
            log_tick(self.run_tick().await);
        }
    }
}

fn log_tick(result: Result<TickReport>) {
    match result {
        Ok(report) if report.examined > 0 => info!(
            examined = report.examined,
            settled = report.settled,
            pending = report.pending,
            failed = report.failed,
            deferred = report.deferred,
            "Reconciliation pass finished"
        ),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Reconciliation pass failed"),
    }
}

/// Owner's side of a spawned [`Reconciler`].
pub struct ReconcilerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signals the worker and waits until it has exited.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await?;
        Ok(())
    }
}
