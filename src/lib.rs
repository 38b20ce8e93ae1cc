pub mod config;
pub mod exec;
pub mod fs_util;
pub mod logging;
pub mod phases;
pub mod repo;
pub mod tls;
pub mod utils;

pub use config::Settings;
