//! Batch CSV interface: replay input and report output.

pub mod csv;
