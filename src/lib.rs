//! netpilot — multi-vendor network device command executor
//!
//! Interprets a declarative JSON task file, drives an interactive shell
//! session to a router/switch/load balancer over SSH or Telnet, and records
//! per-step outcomes back into the task file.

pub mod engine;
pub mod error;
pub mod schema;
pub mod session;
pub mod store;
