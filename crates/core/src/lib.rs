//! Domain types shared by every crate of the image worker.
//!
//! Kept free of any async runtime so that the job model, status state
//! machine and error classification can be used (and tested) anywhere.

pub mod error;
pub mod job;
pub mod metric;
pub mod metric_names;
pub mod model;
