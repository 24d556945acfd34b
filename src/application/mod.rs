//! Application layer containing the core business logic orchestration.
//!
//! `LoyaltyEngine` is the entry point for order and balance operations and
//! `Reconciler` is the background worker that settles orders against the
//! accrual authority through the `AccrualClient`.

pub mod accrual_client;
pub mod auth;
pub mod engine;
pub mod reconciler;
pub mod replay;
