//! Domain layer: pure types, validation, and parsing.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod block_device;
pub mod command;
pub mod config;
pub mod error;
pub mod node;

pub use block_device::{BlockDevice, parse_lsblk};
pub use command::{CommandResult, ExecPolicy};
pub use config::{CredentialDescriptor, CredentialKind, FleetConfig, FleetOptions, MountSpec, NodeEntry};
pub use error::{
    ConfigError, ConnectionError, CredentialError, ExecError, FleetError, NodeError,
    ProvisionError,
};
pub use node::{ConnectionState, NodeClass};
