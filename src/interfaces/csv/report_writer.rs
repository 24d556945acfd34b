use crate::domain::account::{Balance, Withdrawal};
use crate::domain::order::OrderView;
use crate::error::Result;
use chrono::SecondsFormat;
use std::io::Write;

/// Writes query results as CSV.
///
/// Amounts are written normalized (`12.5`, not `12.50`) and timestamps as
/// RFC 3339 in UTC.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_orders(&mut self, orders: &[OrderView]) -> Result<()> {
        self.writer
            .write_record(["number", "status", "accrual", "uploaded_at"])?;
        for order in orders {
            let accrual = order
                .accrual
                .map(|points| points.to_string())
                .unwrap_or_default();
            self.writer.write_record([
                order.number.as_str(),
                order.status.as_str(),
                &accrual,
                &order.uploaded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ])?;
        }
        self.flush()
    }

    pub fn write_withdrawals(&mut self, withdrawals: &[Withdrawal]) -> Result<()> {
        self.writer.write_record(["order", "sum", "processed_at"])?;
        for withdrawal in withdrawals {
            self.writer.write_record([
                withdrawal.order.as_str(),
                &withdrawal.sum.value().normalize().to_string(),
                &withdrawal
                    .processed_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ])?;
        }
        self.flush()
    }

    pub fn write_balance(&mut self, balance: &Balance) -> Result<()> {
        self.writer.write_record(["current", "withdrawn"])?;
        self.writer.write_record([
            balance.current.to_string(),
            balance.withdrawn.to_string(),
        ])?;
        self.flush()
    }

    /// One row per login, in the order given.
    pub fn write_balances(&mut self, balances: &[(String, Balance)]) -> Result<()> {
        self.writer.write_record(["login", "current", "withdrawn"])?;
        for (login, balance) in balances {
            self.writer.write_record([
                login.clone(),
                balance.current.to_string(),
                balance.withdrawn.to_string(),
            ])?;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
