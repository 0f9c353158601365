//! Data model for resolution results, plans and their lifecycle.

pub mod analysis;
pub mod config;
pub mod lifecycle;
pub mod page;
pub mod plan;
