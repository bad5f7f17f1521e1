//! databind - dynamic variable discovery and binding
//!
//! Resolves dynamic configuration values (container addresses, labels,
//! secrets, discovered entity identifiers) from independently cached data
//! sources and substitutes them into configuration templates, producing one
//! resolved configuration per discovered entity.

pub mod binder;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod fetchers;
pub mod watch;

pub use binder::{Binder, Match, Sources, Values};
pub use error::{DatabindError, Result};
