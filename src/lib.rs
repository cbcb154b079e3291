// Deny unused code to catch dead code early (like knip for TS)
#![deny(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

// env_logger is a dependency of the `klogg` bin target (src/main.rs), not of
// this lib target's module tree; this silences the unused-crate-dependencies
// lint for the lib compilation unit.
use env_logger as _;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod byte_source;
pub mod cli;
pub mod concurrency;
pub mod config;
pub mod encoding;
pub mod error;
pub mod file_id;
pub mod filtered_log_data;
pub(crate) mod ignore_poison;
pub mod indexer;
pub mod log_data;
pub mod search;
pub mod session;
pub mod store;
pub mod watcher;
