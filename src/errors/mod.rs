//! Centralized error handling for the EnergyMe sync engine
//!
//! # Error Categories
//!
//! - **Device Errors**: transport, authentication and protocol failures while
//!   polling the device. These abort a single poll run and are recorded by the
//!   coordinator, they never crash the process.
//! - **Application Errors**: configuration problems and coordinators that
//!   could not become ready.
//!
//! # Usage
//!
//! ```rust
//! use energyme_sync::errors::{DeviceError, DeviceResult};
//!
//! fn classify(status: u16) -> DeviceResult<()> {
//!     Err(DeviceError::from_status("/api/v1/health", status))
//! }
//! assert!(classify(401).unwrap_err().is_auth_failure());
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for device transport Results
pub type DeviceResult<T> = Result<T, DeviceError>;
