//! Integration test crate for the sharing subsystem.
//!
//! This crate has no library code. It only contains integration tests
//! that run the sharing service against an on-disk database shared by
//! concurrent callers.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tribe-integration-tests
//! ```
