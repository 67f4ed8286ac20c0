//! muxd-core - scheduling, terminal signal classification and interactive
//! agent sessions
//!
//! One-shot runs go through [`Engine::submit_run`], which admits them through
//! the [`Scheduler`] and executes them with the runner. Interactive sessions
//! live in a terminal multiplexer and are watched by the [`SessionManager`].

pub mod collab;
pub mod config;
pub mod core;
pub mod semantic;
pub mod session;
pub mod types;

pub use collab::{
    ContextLinker, EventSink, MemorySessionStore, NoopContextLinker, NoopRunReporter, RunReporter,
    SessionStore, TracingEventSink,
};
pub use config::{config_path, muxd_home, ConfigError, EngineConfig, SessionConfig};
pub use core::{Collaborators, Engine, Scheduler};
pub use session::{
    ConnectSession, CreateSession, MuxError, Multiplexer, SessionManager, TmuxMultiplexer,
};
pub use types::*;

pub use muxd_runner;
