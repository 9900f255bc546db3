//! Utility functions and helpers.
//!
//! Common utilities for environment variable handling.

pub mod env;

pub use env::{get_env_with_prefix, parse_bool_flag};
