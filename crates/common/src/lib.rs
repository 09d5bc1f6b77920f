//! Common types shared across the Infinity client crates.

#![warn(clippy::pedantic)]

/// Module for conference addressing and identifier types
pub mod types;

/// Module for shared observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
