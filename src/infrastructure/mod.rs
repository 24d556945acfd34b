//! Adapters behind the domain ports: storage backends and the accrual
//! authority transport.

pub mod accrual_http;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
