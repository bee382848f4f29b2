pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod interrupt;
pub mod repo;
pub mod store;
pub mod util;
