//! TOML settings, see `settings/dev.toml` for a complete file.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
