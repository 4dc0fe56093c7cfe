//! Common functionality shared by the Tally crates.
#![warn(missing_docs)]

pub mod time;

pub use crate::time::{NumDate, ParseNumDateError};
