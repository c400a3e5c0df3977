//! Docflow Common Library
//!
//! Shared error handling and logging setup for the docflow workspace.
//!
//! # Example
//!
//! ```no_run
//! use docflow_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{DocflowError, Result};
