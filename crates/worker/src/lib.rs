//! GPU worker runtime.
//!
//! Claims jobs from the coordinator, runs them through process-isolated
//! models and reports the results, wired as a pipeline of stages joined
//! by bounded queues:
//!
//! ```text
//! notifications -> poller -> processing pool -> update -> cleanup
//!                      \____________|______________|________/
//!                                metrics
//! ```
//!
//! The [`killswitch::KillSwitch`] watches every stage and terminates the
//! process when errors pile up faster than local retries can absorb.

pub mod args;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod killswitch;
pub mod metrics;
pub mod output;
pub mod poller;
pub mod processor;
pub mod queue;
pub mod supervisor;
pub mod update;
