//! Interactive sessions
//!
//! - `tmux`: multiplexer access
//! - `pipeline`: capture → stabilize → diff → notify state machine
//! - `manager`: session lifecycle and per-session pollers

mod manager;
mod pipeline;
mod tmux;

pub use manager::{sanitize_input, ConnectSession, CreateSession, SessionManager};
pub use pipeline::{PipelineOutcome, PipelinePhase, PipelineSettings, ScreenDelta, SessionPipeline};
pub use tmux::{MuxError, Multiplexer, TmuxMultiplexer};
