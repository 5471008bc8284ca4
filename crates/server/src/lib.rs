//! HTTP control surface for the harvestline engine.

pub mod api;
pub mod metrics;
pub mod state;
