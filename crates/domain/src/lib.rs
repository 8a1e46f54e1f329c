//! Domain types and math for the single-position CLMM keeper.
//!
//! Everything in this crate is pure: no I/O, no clocks, no async. The
//! protocols and execution crates build on these types.

pub mod entities;
pub mod enums;
pub mod error;
pub mod math;
pub mod value_objects;

pub use error::DomainError;
