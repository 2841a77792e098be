//! SQL text utilities

pub mod template;

pub use template::build;
