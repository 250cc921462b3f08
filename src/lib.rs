pub mod application;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod init;
pub mod loader;
pub mod logging;
pub mod manager;
pub mod naming;
pub mod registry;
pub mod repository;
pub mod translator;
pub mod types;
pub mod variables;

// Re-export main types
pub use types::*;

// Re-export init API for convenience
pub use application::Application;
pub use init::{initialize, InitBuilder, InitOptions};
