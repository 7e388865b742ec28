//! Invocation of the external lip-sync engine.
//!
//! The engine is a black box behind [`executor::LipSyncEngine`]. The
//! production implementation ([`process::SubprocessEngine`]) spawns the
//! engine's Python entry point; [`adapter::EngineAdapter`] wraps any engine
//! with input checks, a concurrency limit, a timeout, and failure mapping.

pub mod adapter;
pub mod executor;
pub mod outcome;
pub mod process;
pub mod subprocess;
