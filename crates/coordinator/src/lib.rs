//! Everything the worker needs to talk to the central coordinator.
//!
//! Provides the [`Coordinator`] seam used by the pipeline stages, its
//! REST implementation [`api::CoordinatorApi`], and the push-based
//! [`notifications::NotificationChannel`] that hints at new work.

pub mod api;
pub mod backoff;
pub mod client;
pub mod error;
pub mod messages;
pub mod notifications;

pub use client::{Coordinator, PayloadKind};
pub use error::CoordinatorError;
