//! Session pipelines.
//!
//! Turns the configured sessions into the step list
//! `[open_all, download:<id>..., collect]`, runs each session's download loop
//! under its own watchdog, and rejects configurations that bind one resource
//! to two sessions before anything starts.

mod collect;
mod factory;
mod pipeline;

pub use collect::{MoveToDirectory, PostProcessor};
pub use factory::{BrowserSessionFactory, SessionFactory};
pub use pipeline::{
    check_resource_bindings, download_step_id, SavedFiles, SessionPipeline, COLLECT_STEP,
    OPEN_ALL_STEP,
};
