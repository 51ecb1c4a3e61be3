pub mod pacing_config;

pub use pacing_config::PacingConfig;
