//! Library crate for threat-scan-rs exposing reusable modules.
pub mod assistant;
pub mod email;
pub mod error;
pub mod report;
pub mod server;
pub mod session;
pub mod settings;
pub mod synth;
pub mod types;
