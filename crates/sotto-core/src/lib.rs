//! Core types and configuration for sotto.
//!
//! This crate provides platform-agnostic types that can be used across
//! all sotto sub-crates.

mod config;
mod device;

pub use config::{Config, ConfigManager};
pub use device::{
    AUTOMATIC_DEVICE_ID, Device, DeviceLabels, SYSTEM_DEFAULT_DEVICE_ID, SelectionState,
    is_reserved_id,
};

/// Application name
pub const APP_NAME: &str = "sotto";

/// Pretty application name for display
pub const APP_NAME_PRETTY: &str = "Sotto";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
