//! Domain layer: order lifecycle, money value objects and the ports the
//! application layer drives.

pub mod accrual;
pub mod account;
pub mod luhn;
pub mod order;
pub mod ports;
pub mod user;
