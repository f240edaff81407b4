//! Shared configuration, errors, constants and calendar-user address types
//! for the Kunai scheduling federation engine.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
