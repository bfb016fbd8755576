//! # Perch Registry
//!
//! Session-scoped service registration over a ZooKeeper-class
//! coordination service.
//!
//! A participant publishes its presence as an ephemeral sequential
//! record under a known namespace, carrying an opaque caller payload.
//! The record is erased by the coordinator the moment the participant's
//! session ends, so the namespace's children are always the set of live
//! participants. Callers poll [`RegistrationHandle::is_registered`] and
//! stop the engine through [`RegistrationHandle::cancel`].

pub mod config;
pub mod engine;

pub use config::RegistrationConfig;
pub use engine::{Registration, RegistrationHandle};
