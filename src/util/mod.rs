//! Utility types and functions shared by every subsystem.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`BBox3f`] and glam re-exports
//! - [`sampling`] - PRNG, low-discrepancy sequences and warps

mod error;
mod math;
pub mod sampling;

pub use error::*;
pub use math::*;
