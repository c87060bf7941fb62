//! Inbound routing and delivery core.
//!
//! A [`Pipeline`] of stages decides, hook by hook, what happens to each
//! transaction. The built-in stages live in [`stages`].

pub mod config;
pub mod error;
pub mod hostfs;
pub mod pipeline;
pub mod stages;

pub use config::Config;
pub use error::{ConfigError, StageError};
pub use hostfs::HostChecker;
pub use pipeline::{Hook, Pipeline, Session, Stage};
