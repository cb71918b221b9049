//! Core engine: the poll cycle and the components it drives.

pub mod accountant;
pub mod activity;
pub mod cycle;
pub mod executor;
pub mod market_data;
