//! Domain logic for the lip-sync generation service.
//!
//! Everything here is free of HTTP concerns: staging uploads on disk,
//! building the engine parameter record, invoking the external lip-sync
//! engine, and provisioning its checkpoint. The `api` crate wires these
//! pieces behind axum handlers.

pub mod artifacts;
pub mod engine;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod provisioning;
