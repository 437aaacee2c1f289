//! Core types: errors, configuration, cancellation, host paths.

pub mod abort;
pub mod config;
pub mod errors;
pub mod paths;
