//! Core types, config, and errors for wa-scribe.

pub mod config;
pub mod error;
pub mod types;
