//! Application services: use-case orchestration.
//!
//! Each service module composes domain logic with port trait calls. Services
//! import only from `crate::domain` and `crate::application::ports`, never
//! from `crate::infra`.

pub mod credentials;
pub mod executor;
pub mod fleet;
pub mod node;
pub mod storage;
