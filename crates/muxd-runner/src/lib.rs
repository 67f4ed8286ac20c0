//! muxd-runner - one-shot agent CLI execution
//!
//! Builds the command line for a provider's CLI, runs it with a timeout and
//! normalizes whatever it printed into a single [`RunResult`] shape.
//!
//! # Example
//!
//! ```no_run
//! use muxd_runner::{Executor, RunRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = Executor::default();
//!
//!     let mut request = RunRequest::new("claude", "Say hello");
//!     request.cwd = Some("/path/to/project".into());
//!
//!     let result = executor.run(request).await;
//!     match result.error {
//!         None => println!("Result: {}", result.text),
//!         Some(err) => eprintln!("{}: {}", err.kind, err.message),
//!     }
//! }
//! ```

mod args;
mod backend;
mod classify;
mod normalize;
mod runner;
mod types;

pub use args::build_args;
pub use backend::{BackendDescriptor, BackendFlags, BackendRegistry, OutputFormat, SESSION_ID_PLACEHOLDER};
pub use classify::{classify_error, ErrorRule, FailureSignal, ERROR_RULES};
pub use normalize::{parse_envelope, parse_event_stream, parse_output};
pub use runner::{Executor, DEFAULT_TIMEOUT};
pub use types::*;
