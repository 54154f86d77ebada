//! rsync supervisor - run rsync as a child process and report on its output.

#[cfg(not(unix))]
compile_error!("rsync-supervisor only supports unix targets");

pub mod capture;
pub mod classify;
pub mod config;
pub mod display;
pub mod supervisor;
