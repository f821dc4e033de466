//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: SSH sessions, config files
//! on disk, and log subscriber setup.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.

pub mod config;
pub mod logging;
pub mod ssh;
