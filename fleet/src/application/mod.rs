//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain`, never on `crate::infra`.

pub mod ports;
pub mod services;

pub use ports::{OutputCapture, RemoteSession, Secret, SessionConnector, SessionTarget, StorageHost};
pub use services::fleet::Fleet;
pub use services::node::{FileFill, Node};
pub use services::storage::{MountAction, MountOutcome};
