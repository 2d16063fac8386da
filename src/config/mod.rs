//! Project configuration (`.strongbox.toml`).

pub mod settings;

pub use settings::Settings;
