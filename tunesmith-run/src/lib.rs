//! Tunesmith run - worker and match-server lifecycle, tuning loops
//!
//! Everything here touches the outside world: working copies on disk,
//! engine child processes, the match arbiter. The pure search logic
//! lives in `tunesmith-core`; this crate drives it.

mod exec;
pub mod manager;
pub mod server;
pub mod worker;

pub use manager::TuningManager;
pub use server::{MatchServer, ServerError};
pub use worker::{Worker, WorkerError, WorkerKind};
