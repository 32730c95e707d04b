//! Utility modules for venvpack
//!
//! - Structured logging setup and configuration
//! - Filesystem helpers shared by the build and promotion stages

pub mod fs;
pub mod logging;

pub use logging::{init_logging, LoggingConfig};
