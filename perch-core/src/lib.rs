//! # Perch Core
//!
//! Shared machinery for the perch coordination engines.
//!
//! This crate provides the pieces both engines are built from:
//!
//! - **Coordinator seam**: traits abstracting a ZooKeeper-class service
//!   (sessions, ephemeral/sequential nodes, one-shot watches)
//! - **Session manager**: owns the live session, one at a time
//! - **Retry supervisor**: paces attempts under randomized exponential
//!   backoff with a quiescence rewind
//! - **Cancellation scope**: edge-triggered, idempotent stop signal
//! - **Status flag**: the caller-visible atomic snapshot
//! - **Error handling**: the error taxonomy the supervisor's recovery
//!   policy is written against
//!
//! The engines themselves live in `perch-election` and `perch-registry`.

pub mod backoff;
pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod session;
pub mod status;

pub use error::{CoordinationError, Result};
pub use retry::{LoopExit, Paused, RetrySupervisor, StartMode};
pub use status::StatusFlag;
