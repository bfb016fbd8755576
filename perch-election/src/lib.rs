//! # Perch Election
//!
//! Non-blocking leader election over a ZooKeeper-class coordination
//! service.
//!
//! Every participant publishes an ephemeral sequential child under a
//! shared namespace; the owner of the smallest child is the leader, and
//! each follower watches only its immediate predecessor. Leadership is
//! relinquished automatically when the owning participant fails, loses
//! its session, or is cancelled.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use perch_core::StartMode;
//! use perch_election::{ElectionConfig, LeaderElection};
//! use perch_testing::InMemoryCoordinator;
//!
//! # async fn run() -> perch_core::Result<()> {
//! let coordinator = Arc::new(InMemoryCoordinator::new());
//! coordinator.ensure_node("/election");
//!
//! let config = ElectionConfig::new(
//!     "/election",
//!     vec!["coord-1:2181".to_string()],
//!     Duration::from_secs(5),
//! );
//! let handle = LeaderElection::new(coordinator, config)
//!     .start(StartMode::Resilient)
//!     .await?;
//!
//! if handle.is_leader() {
//!     // do leader work
//! }
//! handle.cancel();
//! handle.done().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;

pub use config::ElectionConfig;
pub use engine::{ElectionHandle, LeaderElection};
