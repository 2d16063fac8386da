pub mod cli;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod memory;
pub mod sync;
pub mod vault;
