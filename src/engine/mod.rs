// picosense Engine - Core module structure
pub mod cli;
pub mod config;
pub mod server;
pub mod updater;

pub use config::Config;
