//! # mp-core
//!
//! Core types for medpath: the error type, the tabular [`Dataset`] input
//! container, the [`traits::LogDensityModel`] seam between models and the
//! generic optimizer, and the [`FitResult`] bundle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod table;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use table::{Column, Dataset};
pub use types::FitResult;

/// Crate version, embedded in serialized artifacts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
