//! CLI module for the imgly-dewatermark library
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;
mod reporter;

pub use main_impl::{main, Cli, CliEngine, CliOutputFormat};
