//! Agent failure detection.
//!
//! [`HeartbeatMonitor`] pulls a heartbeat from every alive agent on a fixed
//! interval. An agent that fails one is moved to `icu` and handed to a
//! recovery task that retries on the [`CprSchedule`]; if every retry fails the
//! agent is declared dead and its unfinished jobs are placed again.

pub mod cpr;
pub mod heartbeat;

pub use cpr::{CprOutcome, CprSchedule};
pub use heartbeat::HeartbeatMonitor;
