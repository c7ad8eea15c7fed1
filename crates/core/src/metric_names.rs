//! Well-known metric names and attribute keys.
//!
//! These are the canonical names the coordinator aggregates on; the
//! worker stages and the notification parser share them from here.

/// One claim attempt against the coordinator.
pub const METRIC_POLL: &str = "worker.poll";

/// One job run through the compute sandbox (success path).
pub const METRIC_PROCESS: &str = "worker.process";

/// One result record pushed to the coordinator.
pub const METRIC_UPDATE: &str = "worker.update";

/// Wall-clock duration of the measured operation, in seconds.
pub const ATTR_DURATION_SECONDS: &str = "duration_seconds";

pub const ATTR_MODEL: &str = "model";

pub const ATTR_NSFW: &str = "nsfw";

pub const ATTR_STATUS: &str = "status";
