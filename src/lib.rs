//! Thread and deal risk evaluation with Focus/Waiting lists.

pub mod config;
pub mod deals;
pub mod error;
pub mod lists;
pub mod risk;
pub mod shutdown;
pub mod store;
pub mod threads;
