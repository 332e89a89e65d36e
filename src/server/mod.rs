//! Server module for Council
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `init`: Engine construction, router assembly and the run loop

pub mod config;
mod init;
mod loader;

pub use init::{build_engine, run};
pub use loader::load_config;
