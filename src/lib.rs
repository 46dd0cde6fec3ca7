//! Library crate for port-sweep-rs: a bounded concurrent TCP connect scanner for one host.
pub mod config;
pub mod error;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod sink;
pub mod types;
