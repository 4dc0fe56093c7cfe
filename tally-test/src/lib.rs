//! Helpers for testing the storage engine.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`tally_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     tally_test::setup();
//!
//!     tally_log::debug!("hello, world!");
//! }
//! ```

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the Tally crates and mutes all other logs.
pub fn setup() {
    tally_log::init_test!();
}
