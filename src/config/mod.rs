//! Configuration management
//!
//! Handles connection targets, saved profiles and user settings.

pub mod connections;
pub mod settings;

pub use connections::{ConnectTarget, ConnectionProfile, SessionOptions, SslMode, find_connection};
pub use settings::{Settings, load_settings};
