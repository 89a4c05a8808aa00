//! Handler modules for markvault-api.

pub mod snapshots;
pub mod view;
