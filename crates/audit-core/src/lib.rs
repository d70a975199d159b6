//! # audit-core
//!
//! Shared plumbing for the gbq-audit job.
//!
//! This crate provides:
//! - [`AuditError`] - Errors raised while preparing a run
//! - [`logging`] - Tracing setup
//! - [`config`] - Run configuration and credential export
//!
//! ## Example
//!
//! ```no_run
//! use audit_core::{AuditConfig, logging};
//!
//! fn main() -> audit_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let config = AuditConfig::load(None)?;
//!     config.export_credentials()?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::AuditConfig;
pub use error::{AuditError, Result};
pub use logging::{LogGuard, init_logging};
