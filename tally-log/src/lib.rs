//! Logging facade for Tally.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files. This requires the
//! `init` feature.
//!
//! ```ignore
//! use tally_log::{Level, LogConfig};
//!
//! let log_config = LogConfig {
//!     level: Level::Debug,
//!     ..LogConfig::default()
//! };
//!
//! tally_log::init(&log_config);
//! ```
//!
//! The tests of the setup module are compiled with the `init` feature, which `tally-storage`
//! enables as a dev-dependency. To run them on their own, pass `--features init`.
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Logging Error Types
//!
//! To log errors together with their sources, use the [`LogError`] wrapper.
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use tally_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! tally_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate. This requires the `test` feature.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     tally_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

/// All crates of the workspace, logged at maximum verbosity unless `RUST_LOG` is set.
#[cfg(any(feature = "init", feature = "test"))]
const CRATE_NAMES: &[&str] = &["tally_common", "tally_log", "tally_storage", "tally_test"];

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
