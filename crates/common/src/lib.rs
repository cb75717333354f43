//! Common utilities and types shared across the marketplace call crates.

#![warn(clippy::pedantic)]

/// Module for shared identifier types
pub mod types;

/// Module for shared configuration types
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
