//! HTTP front end of the Kunai scheduling federation engine.

pub mod app;
pub mod config;
pub mod error;
pub mod state;
