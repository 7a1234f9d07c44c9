//! Profiler service: configuration and HTTP ingress
//!
//! The binary in `main.rs` wires these together with the core library.

pub mod api;
pub mod config;
