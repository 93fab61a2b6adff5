//! Common types for Vigil: errors, event publishing, and utilities

#![deny(missing_docs)]

pub mod error;
pub mod events;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Component name reported on Kubernetes Events emitted by the controller
pub const CONTROLLER_COMPONENT: &str = "vigil-node-controller";
