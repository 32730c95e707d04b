//! venvpack - two-stage virtual environment builder for ASGI applications
//!
//! A project's declared dependencies are installed from its lock file into an
//! isolated virtual environment inside a throwaway builder stage. Only that
//! environment is promoted into the runtime image, which then starts the
//! application server with `python -m uvicorn`.
//!
//! # Stages
//!
//! - **base**: interpreter version plus the runtime flags every later stage
//!   inherits (`PYTHONFAULTHANDLER`, `PYTHONUNBUFFERED`, `PYTHONHASHSEED`)
//! - **builder**: creates the venv, upgrades the installer and installs the
//!   project constrained by the lock file
//! - **final**: copies the venv alone and records the startup command
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use venvpack::exec::ProcessRunner;
//! use venvpack::pipeline::{PipelineContext, PipelineOrchestrator};
//! use venvpack::PipelineConfig;
//!
//! async fn build(project: std::path::PathBuf) -> Result<(), venvpack::PipelineError> {
//!     let config = PipelineConfig::load(&project)?;
//!     let mut context = PipelineContext::new(
//!         config,
//!         project.clone(),
//!         std::env::temp_dir().join("venvpack-work"),
//!         project.join("dist/image"),
//!         Arc::new(ProcessRunner::new()),
//!     );
//!     let image = PipelineOrchestrator::new().execute(&mut context).await?;
//!     println!("{}", image.root.display());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod image;
pub mod launch;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod stage;
pub mod util;

pub use config::{ConfigError, PipelineConfig};
pub use error::PipelineError;
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
