//! Remote fleet provisioning over SSH.
//!
//! A [`Fleet`] is built from a JSON configuration document. Each node
//! connects, resolves its remote home directory, and brings its declared
//! block devices up as mounted ext4 filesystems. Callers then run bounded,
//! retried shell commands and file transfers against individual nodes.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod app;
pub mod application;
pub mod domain;
pub mod infra;

pub use app::{SshFleet, open_fleet};
pub use application::{Fleet, Node};
