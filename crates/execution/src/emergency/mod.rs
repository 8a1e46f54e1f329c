//! Emergency controls.
//!
//! A negative health verdict from the hedge service moves the keeper into
//! safe mode, where no automated mutation happens until restart.

mod safe_mode;

pub use safe_mode::*;
