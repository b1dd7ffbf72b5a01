//! Agent process plumbing: CLI invocation with streamed output, last-JSON
//! extraction, and the global worker-slot scheduler.

pub mod json;
pub mod runner;
pub mod scheduler;

pub use json::extract_last_json;
pub use runner::{AgentRunner, RunOutput, RunnerError};
pub use scheduler::{ScheduleError, SlotGuard, WorkerScheduler};
