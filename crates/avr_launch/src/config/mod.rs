//! Launcher configuration

mod settings;

pub use settings::*;
