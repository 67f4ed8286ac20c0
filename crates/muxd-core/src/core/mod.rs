//! Core module for muxd
//!
//! - Scheduler: bounded-concurrency, per-key serialized task admission
//! - Engine: composition of scheduler, run executor and session manager

mod engine;
mod scheduler;

pub use engine::{Collaborators, Engine};
pub use scheduler::Scheduler;
