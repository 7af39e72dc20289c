//! Low-level utilities for spawning and reaping processes.
pub extern crate libc;

pub mod process;
pub mod signal;
pub mod spawn;
